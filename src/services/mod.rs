pub mod batch;
pub mod efficiency;
pub mod elo_calculator;
pub mod grader;
pub mod live_updater;
pub mod opponent_adjust;
pub mod predictor;

pub use batch::*;
pub use efficiency::*;
pub use elo_calculator::*;
pub use grader::*;
pub use live_updater::*;
pub use opponent_adjust::*;
pub use predictor::*;
