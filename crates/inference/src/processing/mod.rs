pub mod nms;
pub mod post;
pub mod pre;

pub use nms::{iou, non_max_suppression};
pub use post::{Candidate, OutputLayout};
pub use pre::{Letterbox, TransformParams};
