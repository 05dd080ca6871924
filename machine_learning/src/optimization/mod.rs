mod gradient_descent;
mod gradient_descent_with_momentum;
mod multipliers;
mod optimizer;

pub use gradient_descent::GradientDescent;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use multipliers::LrMultipliers;
pub use optimizer::Optimizer;
