//! Transform requests and their translation into engine invocations.

pub mod crop;
pub mod geometry;
pub mod plan;
pub mod request;
pub mod synthesizer;

pub use crop::{CenterCropSelector, CropWindowSelector};
pub use geometry::{CropWindow, Ratio};
pub use plan::{FilterSpec, GeneratedFile, InvocationPlan, PlanOutput};
pub use request::{
    AppendRequest, AspectPadRequest, AudioExtractRequest, AudioFormat, AudioMuxRequest,
    CaptionImageRequest, CaptionVideoRequest, ConcatRequest, ConcatSegment, FrameExtractRequest,
    ImageFormat, LastFrameRequest, TransformRequest, VerticalCropRequest, WatermarkPosition,
    WatermarkRequest,
};
pub use synthesizer::CommandSynthesizer;
