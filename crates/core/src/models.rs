//! Model catalog: the active roster merged with static model metadata.
//!
//! The service reports which models are currently served (`/status/models`).
//! A separate metadata document describes every known model (style,
//! NSFW flag, trigger words, ...). [`ModelCatalog::build`] joins the two and
//! groups served models by style, appending the meta group holding the
//! `Random!` and `All Models!` selections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::request::{GeneratorType, NsfwMode};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Selection meaning "pick one real model at random".
pub const RANDOM_MODEL: &str = "Random!";
/// Selection meaning "one job group per real model".
pub const ALL_MODELS: &str = "All Models!";
/// Label of the group holding the meta selections.
pub const EXTRA_GROUP: &str = "Extra";
/// Style label of the inpainting-only group.
pub const INPAINTING_GROUP: &str = "inpainting";

/// Models hidden from plain text-to-image generation.
const IMAGE_ONLY_MODELS: &[&str] = &["pix2pix", "stable_diffusion_inpainting"];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One entry of `GET /status/models`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveModel {
    pub name: String,
    pub count: u32,
    pub performance: f64,
    pub queued: f64,
    pub eta: f64,
}

/// Static description of a model from the metadata document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelMetadata {
    pub description: Option<String>,
    pub style: Option<String>,
    pub nsfw: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub trigger: Vec<String>,
    pub showcases: Vec<String>,
}

// ---------------------------------------------------------------------------
// Catalog types
// ---------------------------------------------------------------------------

/// Metadata joined with live roster statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelData {
    pub name: String,
    pub description: Option<String>,
    pub style: Option<String>,
    pub nsfw: bool,
    pub kind: Option<String>,
    pub trigger: Vec<String>,
    pub showcases: Vec<String>,
    pub queued: f64,
    /// Estimated seconds until a queued job starts. Infinite when the
    /// model is not currently served.
    pub eta: f64,
    pub count: u32,
    pub performance: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelGroup {
    pub label: String,
    pub options: Vec<ModelOption>,
}

impl ModelGroup {
    pub fn is_extra(&self) -> bool {
        self.label == EXTRA_GROUP
    }

    pub fn contains(&self, model: &str) -> bool {
        self.options.iter().any(|o| o.value == model)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelCatalog {
    models: Vec<ModelData>,
    groups: Vec<ModelGroup>,
}

impl ModelCatalog {
    /// Join the live roster with the metadata document.
    ///
    /// Every metadata entry becomes a [`ModelData`]; only models present in
    /// the roster are grouped for selection. With [`NsfwMode::Disabled`],
    /// NSFW models are left out of the groups.
    pub fn build(
        active: &[ActiveModel],
        metadata: &BTreeMap<String, ModelMetadata>,
        nsfw: NsfwMode,
    ) -> Self {
        let models: Vec<ModelData> = metadata
            .iter()
            .map(|(name, meta)| {
                let live = active.iter().find(|a| &a.name == name);
                ModelData {
                    name: name.clone(),
                    description: meta.description.clone(),
                    style: meta.style.clone(),
                    nsfw: meta.nsfw,
                    kind: meta.kind.clone(),
                    trigger: meta.trigger.clone(),
                    showcases: meta.showcases.clone(),
                    queued: live.map_or(0.0, |a| a.queued),
                    eta: live.map_or(f64::INFINITY, |a| a.eta),
                    count: live.map_or(0, |a| a.count),
                    performance: live.map_or(0.0, |a| a.performance),
                }
            })
            .collect();

        let mut groups: Vec<ModelGroup> = Vec::new();
        for model in &models {
            if nsfw == NsfwMode::Disabled && model.nsfw {
                continue;
            }
            let Some(live) = active.iter().find(|a| a.name == model.name) else {
                continue;
            };
            let style = model.style.clone().unwrap_or_default();
            let option = ModelOption {
                value: live.name.clone(),
                label: format!(
                    "{}{} ({})",
                    if model.nsfw { "[NSFW] " } else { "" },
                    live.name,
                    live.count
                ),
            };
            match groups.iter_mut().find(|g| g.label == style) {
                Some(group) => group.options.push(option),
                None => groups.push(ModelGroup {
                    label: style,
                    options: vec![option],
                }),
            }
        }

        groups.push(ModelGroup {
            label: EXTRA_GROUP.to_string(),
            options: [RANDOM_MODEL, ALL_MODELS]
                .into_iter()
                .map(|name| ModelOption {
                    value: name.to_string(),
                    label: name.to_string(),
                })
                .collect(),
        });

        Self { models, groups }
    }

    pub fn models(&self) -> &[ModelData] {
        &self.models
    }

    pub fn groups(&self) -> &[ModelGroup] {
        &self.groups
    }

    pub fn find(&self, name: &str) -> Option<&ModelData> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Human-readable description for the current selection.
    pub fn description(&self, selected: &str) -> &str {
        if selected == RANDOM_MODEL {
            return "Generate using a random model.";
        }
        self.find(selected)
            .and_then(|m| m.description.as_deref())
            .unwrap_or("Not Found!")
    }

    /// Groups selectable for a generator type.
    ///
    /// Inpainting only offers the inpainting group, img2img offers
    /// everything but it, and the remaining types hide image-only models.
    /// Multi-model selection drops the meta group.
    pub fn groups_for(&self, generator_type: GeneratorType, multi_model: bool) -> Vec<ModelGroup> {
        let mut filtered: Vec<ModelGroup> = match generator_type {
            GeneratorType::Inpainting => self
                .groups
                .iter()
                .filter(|g| g.label == INPAINTING_GROUP)
                .cloned()
                .collect(),
            GeneratorType::Img2Img => self
                .groups
                .iter()
                .filter(|g| g.label != INPAINTING_GROUP)
                .cloned()
                .collect(),
            GeneratorType::Text2Img | GeneratorType::ControlNet => self
                .groups
                .iter()
                .map(|g| ModelGroup {
                    label: g.label.clone(),
                    options: g
                        .options
                        .iter()
                        .filter(|o| !IMAGE_ONLY_MODELS.contains(&o.value.as_str()))
                        .cloned()
                        .collect(),
                })
                .collect(),
        };
        if multi_model {
            filtered.retain(|g| !g.is_extra());
        }
        filtered
    }

    /// Groups of served models, excluding the meta group.
    pub fn real_groups(&self, generator_type: GeneratorType) -> Vec<ModelGroup> {
        self.groups_for(generator_type, true)
    }

    /// `selected` if any of `groups` offers it, otherwise the first option
    /// of the first group.
    pub fn resolve_selection(groups: &[ModelGroup], selected: &str) -> Option<String> {
        if groups.iter().any(|g| g.contains(selected)) {
            return Some(selected.to_string());
        }
        groups
            .first()
            .and_then(|g| g.options.first())
            .map(|o| o.value.clone())
    }
}

/// Prepend a model's trigger word to the prompt unless it is already there.
pub fn add_trigger(prompt: &str, trigger: &str) -> String {
    if trigger.is_empty() || prompt.contains(trigger) {
        return prompt.to_string();
    }
    format!("{trigger}, {prompt}")
}
