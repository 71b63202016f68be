pub mod cleaner;
pub mod decision;
pub mod locator;
pub mod session;
pub mod similarity;

pub use cleaner::{CleanerState, ScratchCleaner};
pub use decision::{authenticate, AuthVerdict};
pub use locator::{FaceLocator, FaceRect, OnnxFaceLocator};
pub use session::{PreviewFrame, SessionController, SessionMode, SessionPlan, SessionSummary};
pub use similarity::similarity;
