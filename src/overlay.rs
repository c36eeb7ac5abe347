pub mod abi;
pub mod buffer;
pub mod codec;
pub mod compositor;
pub mod controller;
pub mod detector;
pub mod driver;
pub mod messages;
pub mod model;
pub mod monitor;
pub mod producer;
pub mod render;
pub mod surface;

pub use buffer::DetectionBuffer;
pub use codec::{encode_label, pack_color, sanitize_bounding_box};
pub use compositor::{Compositor, CompositorState, TickOutcome};
pub use controller::{Collaborators, OverlayConfig, OverlayController};
pub use detector::{Detector, FrameSource, ReplayDetector, ScreenCapture};
pub use messages::{ExitReason, StopSignal};
pub use model::{BoxRect, Detection, DetectionSet, Label, RawDetection, Rgb, SurfaceRect};
pub use surface::{native_factory, BoxStyle, RenderSurface, SurfaceFactory};
