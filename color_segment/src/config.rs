// THEORY:
// The `ColorSegmentConfig` is the configuration store of the segmenter: the ordered
// list of color sets, the tunable `Settings`, and the `ColorSetMap` derived from
// both. It is an owned value. The coordinator holds the only mutable copy and
// hands each processing pass an immutable snapshot (`ProcessingParameters`), so an
// edit made while a pass is running can never be observed half-applied.
//
// Every edit validates first and mutates second: a rejected edit leaves the store
// exactly as it was. Every accepted edit rebuilds the lookup table.

use crate::core_modules::color_definition::ColorDefinition;
use crate::core_modules::color_set::ColorSet;
use crate::core_modules::color_set_map::ColorSetMap;
use crate::error::{SegmentError, SegmentResult};
use crate::pipeline::ProcessingParameters;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// The most color sets a byte-wide palette index can address (0 is background).
pub const MAX_COLOR_SETS: usize = u8::MAX as usize;

/// Tunable behavior of the segmentation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Squared normalized distance treated as a perfect match.
    pub threshold: f64,
    /// Let strong partial matches claim a lookup-table bucket.
    pub show_partial_matches: bool,
    /// Run the 3x3 majority filter before blob extraction.
    pub despeckle: bool,
    /// Blobs with fewer pixels are discarded.
    pub min_blob_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            show_partial_matches: true,
            despeckle: false,
            min_blob_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSegmentConfig {
    pub settings: Settings,
    colors: Vec<ColorSet>,
    #[serde(skip)]
    color_set_map: Arc<ColorSetMap>,
}

impl ColorSegmentConfig {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            colors: Vec::new(),
            color_set_map: Arc::new(ColorSetMap::empty()),
        }
    }

    /// Parses a stored configuration and drops anything invalid in it.
    pub fn from_json(json: &str) -> SegmentResult<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.sanitize();
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SegmentResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            color_sets = config.colors.len(),
            "loaded color segment configuration"
        );
        Ok(config)
    }

    pub fn to_json(&self) -> SegmentResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> SegmentResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        tracing::info!(path = %path.display(), "saved color segment configuration");
        Ok(())
    }

    /// Brings a stored configuration back to the invariants every edit keeps:
    /// set names are unique, each definition carries its set's name, no set holds
    /// the same color twice, invalid definitions and empty sets are gone, and the
    /// palette limit holds. Rebuilds the lookup table afterwards.
    pub fn sanitize(&mut self) {
        let mut merged: Vec<ColorSet> = Vec::with_capacity(self.colors.len());

        for set in std::mem::take(&mut self.colors) {
            let index = match merged.iter().position(|existing| existing.name == set.name) {
                Some(index) => {
                    tracing::warn!(set = %set.name, "merging duplicate color set");
                    index
                }
                None => {
                    merged.push(ColorSet {
                        name: set.name.clone(),
                        colors: Vec::with_capacity(set.colors.len()),
                    });
                    merged.len() - 1
                }
            };
            let target = &mut merged[index];

            for mut color in set.colors {
                if color.name != target.name {
                    tracing::warn!(set = %target.name, color = %color.name, "renaming color definition to its set");
                    color.name = target.name.clone();
                }
                if !color.validate() {
                    tracing::warn!(set = %target.name, "dropping invalid color definition");
                    continue;
                }
                if target.colors.iter().any(|existing| existing.same_color(&color)) {
                    tracing::warn!(set = %target.name, "dropping duplicate color definition");
                    continue;
                }
                target.colors.push(color);
            }
        }

        merged.retain(|set| !set.colors.is_empty());
        if merged.len() > MAX_COLOR_SETS {
            tracing::warn!(
                dropped = merged.len() - MAX_COLOR_SETS,
                "dropping color sets beyond the palette limit"
            );
            merged.truncate(MAX_COLOR_SETS);
        }
        self.colors = merged;
        self.rebuild_color_set_map();
    }

    pub fn colors(&self) -> &[ColorSet] {
        &self.colors
    }

    pub fn color_set_map(&self) -> &Arc<ColorSetMap> {
        &self.color_set_map
    }

    /// An immutable copy of everything a processing pass needs.
    pub fn snapshot(&self) -> ProcessingParameters {
        ProcessingParameters {
            colors: self.colors.clone(),
            settings: self.settings.clone(),
            color_set_map: Arc::clone(&self.color_set_map),
        }
    }

    /// Adds `definition` to the set of the same name, creating the set if needed.
    pub fn add_color_definition(&mut self, mut definition: ColorDefinition) -> SegmentResult<()> {
        if !definition.validate() {
            return Err(SegmentError::InvalidColorDefinition(definition.name));
        }

        match self.colors.iter_mut().find(|set| set.name == definition.name) {
            Some(set) => {
                if set.colors.iter().any(|color| color.same_color(&definition)) {
                    return Err(SegmentError::DuplicateColorDefinition(definition.name));
                }
                set.colors.push(definition);
            }
            None => {
                if self.colors.len() >= MAX_COLOR_SETS {
                    return Err(SegmentError::TooManyColorSets(MAX_COLOR_SETS));
                }
                tracing::debug!(set = %definition.name, "creating color set");
                self.colors.push(ColorSet::new(definition));
            }
        }

        self.rebuild_color_set_map();
        Ok(())
    }

    /// Removes the definition matching `definition` by name and YCbCr. A set
    /// left without definitions is removed entirely.
    pub fn remove_color_definition(&mut self, definition: &ColorDefinition) -> SegmentResult<()> {
        let set_index = self
            .colors
            .iter()
            .position(|set| set.name == definition.name)
            .ok_or_else(|| SegmentError::UnknownColorSet(definition.name.clone()))?;

        let set = &mut self.colors[set_index];
        let color_index = set
            .colors
            .iter()
            .position(|color| color.same_color(definition))
            .ok_or_else(|| SegmentError::UnknownColorDefinition(definition.name.clone()))?;

        set.colors.remove(color_index);
        if set.colors.is_empty() {
            tracing::debug!(set = %definition.name, "removing empty color set");
            self.colors.remove(set_index);
        }

        self.rebuild_color_set_map();
        Ok(())
    }

    /// Replaces the definition with the same name and YCbCr, typically to change
    /// its tolerances.
    pub fn update_color_definition(&mut self, mut definition: ColorDefinition) -> SegmentResult<()> {
        if !definition.validate() {
            return Err(SegmentError::InvalidColorDefinition(definition.name));
        }

        let set = self
            .colors
            .iter_mut()
            .find(|set| set.name == definition.name)
            .ok_or_else(|| SegmentError::UnknownColorSet(definition.name.clone()))?;

        let existing = set
            .colors
            .iter_mut()
            .find(|color| color.same_color(&definition))
            .ok_or_else(|| SegmentError::UnknownColorDefinition(definition.name.clone()))?;

        *existing = definition;
        self.rebuild_color_set_map();
        Ok(())
    }

    /// Widens the luma tolerance of the definition identified by name and YCbCr.
    pub fn expand_luma_tolerance(&mut self, name: &str, y: i32, cb: i32, cr: i32) -> SegmentResult<()> {
        let key = ColorDefinition::from_ycbcr(name, y, cb, cr);
        let existing = self
            .find_color_set(name)?
            .colors
            .iter()
            .find(|color| color.same_color(&key))
            .ok_or_else(|| SegmentError::UnknownColorDefinition(name.to_string()))?;

        let widened = existing.widened_luma();
        self.update_color_definition(widened)
    }

    pub fn find_color_set(&self, name: &str) -> SegmentResult<&ColorSet> {
        self.colors
            .iter()
            .find(|set| set.name == name)
            .ok_or_else(|| SegmentError::UnknownColorSet(name.to_string()))
    }

    /// Replaces the settings; the threshold feeds the lookup table, so it is rebuilt.
    pub fn update_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.rebuild_color_set_map();
    }

    fn rebuild_color_set_map(&mut self) {
        let started = Instant::now();
        self.color_set_map = Arc::new(ColorSetMap::build(&self.colors, &self.settings));
        tracing::debug!(
            color_sets = self.colors.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "rebuilt color set map"
        );
    }
}
