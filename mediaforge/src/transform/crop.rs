//! Crop-window selection for vertical reframing.

use async_trait::async_trait;

use super::geometry::{CropWindow, Ratio};
use crate::media::{MediaAsset, MediaInfo};
use crate::{Error, Result};

/// Chooses which part of the frame survives a crop to `target`.
///
/// Implementations may inspect the asset (for example a saliency or face
/// detector); the synthesizer only consumes the normalized window.
#[async_trait]
pub trait CropWindowSelector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn select(&self, asset: &MediaAsset, info: &MediaInfo, target: Ratio) -> Result<CropWindow>;
}

/// The largest centered window of the target ratio.
#[derive(Debug, Clone, Copy, Default)]
pub struct CenterCropSelector;

#[async_trait]
impl CropWindowSelector for CenterCropSelector {
    fn name(&self) -> &'static str {
        "center"
    }

    async fn select(&self, _asset: &MediaAsset, info: &MediaInfo, target: Ratio) -> Result<CropWindow> {
        let (width, height) = info.dimensions("video")?;
        Ok(CropWindow::centered(width, height, target))
    }
}

/// Ask `selector` for a window and reject anything outside the frame.
pub(crate) async fn select_window(
    selector: &dyn CropWindowSelector,
    asset: &MediaAsset,
    info: &MediaInfo,
    target: Ratio,
) -> Result<CropWindow> {
    let window = selector.select(asset, info, target).await?;
    if !window.is_valid() {
        return Err(Error::Other(format!(
            "crop selector '{}' returned an out-of-frame window",
            selector.name()
        )));
    }
    Ok(window)
}
