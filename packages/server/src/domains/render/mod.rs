//! Render domain: the pipeline that turns a leased job into an uploaded
//! video, and the progress plane that narrates it.

pub mod pipeline;
pub mod progress;

pub use pipeline::{
    Bundler, CliBundler, CliRenderer, DependencyInstaller, PipelineConfig, ProcessInstaller,
    RenderPipeline, RenderRequest, Renderer,
};
pub use progress::ProgressReporter;
