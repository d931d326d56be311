//! The boundary to the acquisition and masking layer.
//!
//! Scene search, cloud masking, unmixing and index computation all happen on
//! the far side of [`SeriesProvider`]. The detector only ever asks it for
//! ready-made per-pixel series over a window of years and for the eligibility
//! mask. Each call is a synchronous supply point: it returns a complete stack
//! or fails, and a failure aborts the run.

use crate::core_modules::epoch::YearWindow;
use crate::core_modules::observation::PixelSeries;
use crate::core_modules::raster::{EligibilityMask, RasterRegion, SeriesStack};
use crate::error::FetchError;
use image::GrayImage;

pub trait SeriesProvider {
    /// Observations used to fit the model over `window`.
    fn training_series(
        &self,
        region: &RasterRegion,
        window: YearWindow,
    ) -> Result<SeriesStack, FetchError>;

    /// Observations to monitor over `window`.
    fn monitoring_series(
        &self,
        region: &RasterRegion,
        window: YearWindow,
    ) -> Result<SeriesStack, FetchError>;

    /// Pixels whose eligibility measure (percent tree cover) exceeds `threshold`.
    fn eligibility_mask(
        &self,
        region: &RasterRegion,
        threshold: u8,
    ) -> Result<EligibilityMask, FetchError>;
}

impl<P: SeriesProvider + ?Sized> SeriesProvider for &P {
    fn training_series(
        &self,
        region: &RasterRegion,
        window: YearWindow,
    ) -> Result<SeriesStack, FetchError> {
        (**self).training_series(region, window)
    }

    fn monitoring_series(
        &self,
        region: &RasterRegion,
        window: YearWindow,
    ) -> Result<SeriesStack, FetchError> {
        (**self).monitoring_series(region, window)
    }

    fn eligibility_mask(
        &self,
        region: &RasterRegion,
        threshold: u8,
    ) -> Result<EligibilityMask, FetchError> {
        (**self).eligibility_mask(region, threshold)
    }
}

/// A provider backed by complete in-memory histories and a tree cover raster.
///
/// Useful for replaying archived series and for tests. Training and
/// monitoring requests slice the same histories.
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    region: RasterRegion,
    histories: Vec<PixelSeries>,
    tree_cover: GrayImage,
}

impl InMemoryProvider {
    pub fn new(region: RasterRegion, histories: Vec<PixelSeries>, tree_cover: GrayImage) -> Self {
        Self {
            region,
            histories,
            tree_cover,
        }
    }

    /// Every pixel fully forested.
    pub fn fully_forested(region: RasterRegion, histories: Vec<PixelSeries>) -> Self {
        let tree_cover = GrayImage::from_pixel(region.width, region.height, image::Luma([100]));
        Self::new(region, histories, tree_cover)
    }

    fn slice(
        &self,
        region: &RasterRegion,
        window: YearWindow,
    ) -> Result<SeriesStack, FetchError> {
        if *region != self.region {
            return Err(format!("region {region:?} is not served by this provider").into());
        }
        Ok(self
            .histories
            .iter()
            .map(|h| h.window(window.start(), window.end()))
            .collect::<Vec<_>>()
            .into())
    }
}

impl SeriesProvider for InMemoryProvider {
    fn training_series(
        &self,
        region: &RasterRegion,
        window: YearWindow,
    ) -> Result<SeriesStack, FetchError> {
        self.slice(region, window)
    }

    fn monitoring_series(
        &self,
        region: &RasterRegion,
        window: YearWindow,
    ) -> Result<SeriesStack, FetchError> {
        self.slice(region, window)
    }

    fn eligibility_mask(
        &self,
        region: &RasterRegion,
        threshold: u8,
    ) -> Result<EligibilityMask, FetchError> {
        if *region != self.region {
            return Err(format!("region {region:?} is not served by this provider").into());
        }
        Ok(EligibilityMask::from_tree_cover(&self.tree_cover, threshold))
    }
}
