use crate::common::BoundingBox;
use crate::error::ConfigError;
use crate::pipeline::detection::calibrator::BarKind;
use crate::pipeline::detection::core::{ColorRange, EntityCategory, RoiSpec};
use config::{Environment, File, FileFormat};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix for environment overrides, e.g. `HUNTBOT__TARGETING__MAX_REACH=500`.
pub const ENV_PREFIX: &str = "HUNTBOT";

/// Everything the detection engine can be tuned with. Every field has a
/// default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub viewport: Viewport,
    pub driver: DriverConfig,
    pub player: ActorConfig,
    pub target: ActorConfig,
    pub entity_roi: RoiSpec,
    pub entities: IndexMap<EntityCategory, CategoryConfig>,
    pub cluster: ClusterConfig,
    pub calibration: CalibrationConfig,
    pub marker: MarkerConfig,
    pub targeting: TargetingConfig,
}

/// Expected capture size. ROIs are checked against it at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphologyConfig {
    /// Side of the square structuring element; 0 or 1 disables smoothing
    pub kernel: u32,
    pub iterations: u32,
    /// Follow the opening with a closing (for continuous fills)
    pub close: bool,
}

/// Inclusive size limits a detected region must respect to be believed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlausibilityWindow {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

/// Bars of one actor (the player, or whatever the player has selected).
/// An actor section given in a file must name its ROI and bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorConfig {
    pub roi: RoiSpec,
    #[serde(default)]
    pub window: PlausibilityWindow,
    #[serde(default = "MorphologyConfig::continuous_fill")]
    pub morphology: MorphologyConfig,
    pub bars: IndexMap<BarKind, Vec<ColorRange>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub colors: Vec<ColorRange>,
    pub morphology: MorphologyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Largest horizontal gap bridged when building column groups
    pub x_gap: u32,
    /// Largest vertical gap bridged inside a column group
    pub y_gap: u32,
    pub window: PlausibilityWindow,
    /// Candidates lying entirely inside here are the player's own overlay
    pub dead_zone: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Consecutive unchanged cycles before a new ceiling may be committed
    pub stability_window: u32,
    /// Consecutive all-zero cycles before an actor's overlay counts as closed
    pub closed_after: u32,
}

/// Rectangle expressed as fractions of the frame, for areas that scale with it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenFraction {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    pub search_area: ScreenFraction,
    pub primary: Vec<ColorRange>,
    pub fallback: Vec<ColorRange>,
    /// A region must have more pixels than this to count as the marker
    pub min_pixels: u32,
    pub morphology: MorphologyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetingConfig {
    pub max_reach: f64,
    /// Categories tried in order when picking the snapshot's best target
    pub priority: Vec<EntityCategory>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let mut entities = IndexMap::new();
        entities.insert(
            EntityCategory::PassiveCreature,
            CategoryConfig::new(vec![ColorRange::new((55, 80, 225), (65, 105, 245))]),
        );
        entities.insert(
            EntityCategory::AggressiveCreature,
            CategoryConfig::new(vec![
                ColorRange::new((0, 205, 170), (4, 240, 190)),
                ColorRange::new((356, 205, 170), (359, 240, 190)),
            ]),
        );
        entities.insert(
            EntityCategory::SpecialCreature,
            CategoryConfig::new(vec![ColorRange::new((340, 40, 175), (359, 70, 190))]),
        );

        Self {
            viewport: Viewport::default(),
            driver: DriverConfig::default(),
            player: ActorConfig::player(),
            target: ActorConfig::target(),
            entity_roi: RoiSpec::new(0, 0, -1, -100),
            entities,
            cluster: ClusterConfig::default(),
            calibration: CalibrationConfig::default(),
            marker: MarkerConfig::default(),
            targeting: TargetingConfig::default(),
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl Default for MorphologyConfig {
    fn default() -> Self {
        Self {
            kernel: 1,
            iterations: 1,
            close: false,
        }
    }
}

impl MorphologyConfig {
    /// Opening to drop speckle, closing to bridge anti-aliased seams
    pub fn continuous_fill() -> Self {
        Self {
            kernel: 3,
            iterations: 1,
            close: true,
        }
    }
}

impl Default for PlausibilityWindow {
    fn default() -> Self {
        Self {
            min_width: 1,
            max_width: u32::MAX,
            min_height: 1,
            max_height: u32::MAX,
        }
    }
}

impl PlausibilityWindow {
    pub fn new(min_width: u32, max_width: u32, min_height: u32, max_height: u32) -> Self {
        Self {
            min_width,
            max_width,
            min_height,
            max_height,
        }
    }

    pub fn admits_width(&self, width: u32) -> bool {
        (self.min_width..=self.max_width).contains(&width)
    }

    pub fn admits(&self, bounds: &BoundingBox) -> bool {
        self.admits_width(bounds.width)
            && (self.min_height..=self.max_height).contains(&bounds.height)
    }

    fn validate(&self, owner: &'static str) -> Result<(), ConfigError> {
        if self.min_width > self.max_width || self.min_height > self.max_height {
            return Err(ConfigError::InvalidParameter(
                owner,
                format!("inverted plausibility window {:?}", self),
            ));
        }
        Ok(())
    }
}

impl ActorConfig {
    pub fn player() -> Self {
        let mut bars = IndexMap::new();
        bars.insert(BarKind::Hp, vec![ColorRange::new((340, 200, 160), (350, 240, 230))]);
        bars.insert(BarKind::Mp, vec![ColorRange::new((190, 180, 180), (225, 240, 240))]);
        bars.insert(BarKind::Fp, vec![ColorRange::new((110, 160, 120), (130, 230, 235))]);
        Self {
            roi: RoiSpec::new(0, 0, 500, 350),
            window: PlausibilityWindow::new(1, 300, 12, 30),
            morphology: MorphologyConfig::continuous_fill(),
            bars,
        }
    }

    /// The selected target shows no FP bar.
    pub fn target() -> Self {
        let mut bars = IndexMap::new();
        bars.insert(BarKind::Hp, vec![ColorRange::new((340, 120, 150), (355, 240, 230))]);
        bars.insert(BarKind::Mp, vec![ColorRange::new((198, 114, 190), (234, 200, 240))]);
        Self {
            roi: RoiSpec::new(400, 0, -400, 200),
            window: PlausibilityWindow::new(1, 600, 12, 30),
            morphology: MorphologyConfig::continuous_fill(),
            bars,
        }
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl CategoryConfig {
    pub fn new(colors: Vec<ColorRange>) -> Self {
        Self {
            colors,
            morphology: MorphologyConfig::default(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            x_gap: 50,
            y_gap: 3,
            window: PlausibilityWindow::new(15, 150, 1, 60),
            dead_zone: BoundingBox::new(0, 0, 251, 111),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            stability_window: 30,
            closed_after: 5,
        }
    }
}

impl ScreenFraction {
    pub fn resolve(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let x = (self.x * width as f32).round() as i32;
        let y = (self.y * height as f32).round() as i32;
        let w = (self.width * width as f32).round() as u32;
        let h = (self.height * height as f32).round() as u32;
        BoundingBox::new(0, 0, width, height).intersection(&BoundingBox::new(x, y, w, h))
    }

    fn is_valid(&self) -> bool {
        let unit = 0.0..=1.0;
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| unit.contains(v))
            && self.width > 0.0
            && self.height > 0.0
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            // upper-middle of the screen, where the marker floats over the selection
            search_area: ScreenFraction {
                x: 0.25,
                y: 1.0 / 6.0,
                width: 0.5,
                height: 1.0 / 3.0,
            },
            primary: vec![ColorRange::new((348, 140, 235), (359, 185, 255))],
            fallback: vec![ColorRange::new((220, 80, 195), (232, 105, 215))],
            min_pixels: 20,
            morphology: MorphologyConfig::default(),
        }
    }
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            max_reach: 325.0,
            priority: vec![
                EntityCategory::AggressiveCreature,
                EntityCategory::PassiveCreature,
            ],
        }
    }
}

impl DetectionConfig {
    /// Loads a file (format from its extension) layered with `HUNTBOT__*`
    /// environment overrides, then validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let configuration: DetectionConfig = settings.try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn from_source(source: &str, format: FileFormat) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(File::from_str(source, format))
            .build()?;
        let configuration: DetectionConfig = settings.try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    /// Set the reach used for the snapshot's best target
    pub fn with_max_reach(mut self, max_reach: f64) -> Self {
        self.targeting.max_reach = max_reach;
        self
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport { width, height };
        self
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Viewport { width, height } = self.viewport;
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidParameter(
                "viewport",
                format!("{}x{} is empty", width, height),
            ));
        }
        if self.driver.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidParameter(
                "driver.poll_interval_ms",
                "must be greater than 0".to_string(),
            ));
        }

        self.validate_actor("player", &self.player)?;
        self.validate_actor("target", &self.target)?;

        self.validate_roi("entity_roi", &self.entity_roi)?;
        for (category, settings) in &self.entities {
            if *category == EntityCategory::TargetMarker {
                return Err(ConfigError::InvalidParameter(
                    "entities",
                    "the target marker is configured under `marker`".to_string(),
                ));
            }
            validate_ranges(category.name(), &settings.colors)?;
            validate_morphology("entities.morphology", &settings.morphology)?;
        }

        self.cluster.window.validate("cluster.window")?;

        if self.calibration.stability_window == 0 {
            return Err(ConfigError::InvalidParameter(
                "calibration.stability_window",
                "must be greater than 0".to_string(),
            ));
        }
        if self.calibration.closed_after == 0 {
            return Err(ConfigError::InvalidParameter(
                "calibration.closed_after",
                "must be greater than 0".to_string(),
            ));
        }

        if !self.marker.search_area.is_valid()
            || self.marker.search_area.resolve(width, height).is_none()
        {
            return Err(ConfigError::RoiOutOfBounds(
                "marker.search_area".to_string(),
                width,
                height,
            ));
        }
        validate_ranges("marker.primary", &self.marker.primary)?;
        validate_ranges("marker.fallback", &self.marker.fallback)?;
        validate_morphology("marker.morphology", &self.marker.morphology)?;

        if !(self.targeting.max_reach.is_finite() && self.targeting.max_reach > 0.0) {
            return Err(ConfigError::InvalidParameter(
                "targeting.max_reach",
                format!("{} is not a positive distance", self.targeting.max_reach),
            ));
        }

        Ok(())
    }

    fn validate_actor(&self, name: &'static str, actor: &ActorConfig) -> Result<(), ConfigError> {
        if actor.bars.is_empty() {
            return Err(ConfigError::MissingColorRange(name.to_string()));
        }
        self.validate_roi(name, &actor.roi)?;
        actor.window.validate(name)?;
        validate_morphology(name, &actor.morphology)?;
        for (kind, ranges) in &actor.bars {
            validate_ranges(&format!("{}.{}", name, kind), ranges)?;
        }
        Ok(())
    }

    fn validate_roi(&self, name: &str, roi: &RoiSpec) -> Result<(), ConfigError> {
        let Viewport { width, height } = self.viewport;
        match roi.resolve(width, height) {
            Some(_) => Ok(()),
            None => Err(ConfigError::RoiOutOfBounds(name.to_string(), width, height)),
        }
    }
}

fn validate_ranges(owner: &str, ranges: &[ColorRange]) -> Result<(), ConfigError> {
    if ranges.is_empty() {
        return Err(ConfigError::MissingColorRange(owner.to_string()));
    }
    ranges.iter().try_for_each(|range| range.validate(owner))
}

fn validate_morphology(owner: &'static str, morphology: &MorphologyConfig) -> Result<(), ConfigError> {
    if morphology.kernel > 1 && morphology.iterations == 0 {
        return Err(ConfigError::InvalidParameter(
            owner,
            "a smoothing kernel needs at least one iteration".to_string(),
        ));
    }
    Ok(())
}
