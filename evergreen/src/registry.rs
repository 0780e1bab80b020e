//! The fixed stage registry.
//!
//! Built once at startup from the standard descriptor table plus settings
//! (model overrides, provider default models) and immutable afterwards.
//! Construction enforces the canonical-source rule: every canonical
//! artifact has exactly one producing stage, and every consumer of an
//! artifact sits in a later phase than its producer.

use crate::config::EvergreenSettings;
use crate::core::{Phase, Provider, StageId, StageKind};
use crate::errors::{ErrorInfo, RegistryError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Data produced once by a single stage and only referenced afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalArtifact {
    /// Distilled core message of the episode.
    EpisodeCrux,
    /// Verbatim quotes.
    QuoteSet,
}

impl CanonicalArtifact {
    /// Every canonical artifact.
    pub const ALL: [Self; 2] = [Self::EpisodeCrux, Self::QuoteSet];

    /// Tag name.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::EpisodeCrux => "episode_crux",
            Self::QuoteSet => "quote_set",
        }
    }
}

impl fmt::Display for CanonicalArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Static description of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Stage identifier.
    pub id: StageId,
    /// Human-readable name.
    pub name: String,
    /// Provider back-end.
    pub provider: Provider,
    /// Model name.
    pub model: String,
    /// Logical phase.
    pub phase: Phase,
    /// Validation regime.
    pub kind: StageKind,
    /// Canonical artifacts this stage produces.
    pub canonical: Vec<CanonicalArtifact>,
    /// Canonical artifacts this stage reads.
    pub consumes: Vec<CanonicalArtifact>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
}

impl StageDescriptor {
    /// Creates a descriptor with the stage's fixed phase and kind.
    #[must_use]
    pub fn new(id: StageId, provider: Provider, model: impl Into<String>) -> Self {
        Self {
            id,
            name: id.display_name().to_string(),
            provider,
            model: model.into(),
            phase: id.phase(),
            kind: id.kind(),
            canonical: Vec::new(),
            consumes: Vec::new(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }

    /// Declares a produced canonical artifact.
    #[must_use]
    pub fn produces(mut self, artifact: CanonicalArtifact) -> Self {
        self.canonical.push(artifact);
        self
    }

    /// Declares a consumed canonical artifact.
    #[must_use]
    pub fn reads(mut self, artifact: CanonicalArtifact) -> Self {
        self.consumes.push(artifact);
        self
    }

    /// Sets the sampling parameters.
    #[must_use]
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

/// The standard ten-stage table.
#[must_use]
pub fn standard_descriptors(settings: &EvergreenSettings) -> Vec<StageDescriptor> {
    use CanonicalArtifact::{EpisodeCrux, QuoteSet};

    let model = |id: StageId, provider: Provider| {
        settings
            .model_overrides
            .get(&id)
            .cloned()
            .unwrap_or_else(|| settings.providers.get(provider).default_model.clone())
    };
    let anthropic =
        |id| StageDescriptor::new(id, Provider::Anthropic, model(id, Provider::Anthropic));
    let openai = |id| StageDescriptor::new(id, Provider::OpenAi, model(id, Provider::OpenAi));

    vec![
        anthropic(StageId::Preprocessing).with_sampling(0.2, 4096),
        anthropic(StageId::TranscriptAnalysis)
            .produces(EpisodeCrux)
            .with_sampling(0.3, 2048),
        anthropic(StageId::QuoteExtraction)
            .produces(QuoteSet)
            .with_sampling(0.2, 2048),
        openai(StageId::BlogOutline)
            .reads(EpisodeCrux)
            .reads(QuoteSet)
            .with_sampling(0.4, 2048),
        openai(StageId::ParagraphDetails)
            .reads(EpisodeCrux)
            .reads(QuoteSet)
            .with_sampling(0.4, 3000),
        openai(StageId::Headlines)
            .reads(EpisodeCrux)
            .with_sampling(0.6, 1024),
        anthropic(StageId::DraftGeneration)
            .reads(EpisodeCrux)
            .reads(QuoteSet)
            .with_sampling(0.7, 8192),
        anthropic(StageId::Refinement)
            .reads(EpisodeCrux)
            .with_sampling(0.5, 8192),
        openai(StageId::SocialContent)
            .reads(EpisodeCrux)
            .reads(QuoteSet)
            .with_sampling(0.8, 2048),
        openai(StageId::EmailCampaign)
            .reads(EpisodeCrux)
            .with_sampling(0.7, 2048),
    ]
}

/// Builder that validates descriptors as they are registered.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: HashMap<StageId, StageDescriptor>,
    producers: HashMap<CanonicalArtifact, StageId>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is already registered or claims a
    /// canonical artifact another stage already produces.
    pub fn register(mut self, descriptor: StageDescriptor) -> Result<Self, RegistryError> {
        if self.descriptors.contains_key(&descriptor.id) {
            return Err(RegistryError::new(format!(
                "Stage '{}' is registered twice",
                descriptor.id
            ))
            .with_stages(vec![descriptor.id])
            .with_error_info(
                ErrorInfo::new("REGISTRY-002-DUPLICATE_STAGE", "Duplicate stage descriptor")
                    .with_fix_hint("Register each stage exactly once."),
            ));
        }

        for artifact in &descriptor.canonical {
            if let Some(existing) = self.producers.get(artifact) {
                return Err(RegistryError::new(format!(
                    "Canonical artifact '{artifact}' is already produced by '{existing}'; '{}' cannot also produce it",
                    descriptor.id
                ))
                .with_stages(vec![*existing, descriptor.id])
                .with_error_info(
                    ErrorInfo::new(
                        "REGISTRY-001-CANONICAL",
                        format!("Second producer for '{artifact}'"),
                    )
                    .with_context_entry("artifact", artifact.tag())
                    .with_fix_hint("Read the artifact through its accessor instead of producing it again."),
                ));
            }
        }

        for artifact in &descriptor.canonical {
            self.producers.insert(*artifact, descriptor.id);
        }
        self.descriptors.insert(descriptor.id, descriptor);
        Ok(self)
    }

    /// Registers every descriptor in order.
    ///
    /// # Errors
    ///
    /// Returns the first registration error.
    pub fn register_all(
        self,
        descriptors: impl IntoIterator<Item = StageDescriptor>,
    ) -> Result<Self, RegistryError> {
        descriptors.into_iter().try_fold(self, Self::register)
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage or producer is missing, or a consumer is
    /// scheduled no later than its producer.
    pub fn build(mut self) -> Result<StageRegistry, RegistryError> {
        let missing: Vec<StageId> = StageId::ALL
            .into_iter()
            .filter(|id| !self.descriptors.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(RegistryError::new(format!(
                "Registry is missing stages: {}",
                missing
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
            .with_stages(missing)
            .with_error_info(ErrorInfo::new(
                "REGISTRY-003-MISSING_STAGE",
                "Every stage needs a descriptor",
            )));
        }

        for artifact in CanonicalArtifact::ALL {
            let Some(&producer) = self.producers.get(&artifact) else {
                return Err(RegistryError::new(format!(
                    "No stage produces canonical artifact '{artifact}'"
                ))
                .with_error_info(ErrorInfo::new(
                    "REGISTRY-004-MISSING_PRODUCER",
                    format!("'{artifact}' has no producer"),
                )));
            };
            let producer_phase = self.descriptors[&producer].phase;
            for descriptor in self.descriptors.values() {
                if descriptor.consumes.contains(&artifact) && descriptor.phase <= producer_phase {
                    return Err(RegistryError::new(format!(
                        "Stage '{}' reads '{artifact}' but runs no later than its producer '{producer}'",
                        descriptor.id
                    ))
                    .with_stages(vec![producer, descriptor.id])
                    .with_error_info(
                        ErrorInfo::new(
                            "REGISTRY-005-TOPOLOGY",
                            "Consumer scheduled before producer",
                        )
                        .with_fix_hint("Move the consumer to a later phase."),
                    ));
                }
            }
        }

        let descriptors = StageId::ALL
            .into_iter()
            .filter_map(|id| self.descriptors.remove(&id))
            .collect();

        Ok(StageRegistry {
            descriptors,
            producers: self.producers,
        })
    }
}

/// Immutable lookup of stage descriptors.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    /// Indexed by `StageId::index()`.
    descriptors: Vec<StageDescriptor>,
    producers: HashMap<CanonicalArtifact, StageId>,
}

impl StageRegistry {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Builds the standard registry for the given settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the standard table is inconsistent.
    pub fn standard(settings: &EvergreenSettings) -> Result<Self, RegistryError> {
        RegistryBuilder::new()
            .register_all(standard_descriptors(settings))?
            .build()
    }

    /// Descriptor for a stage.
    #[must_use]
    pub fn get(&self, id: StageId) -> &StageDescriptor {
        &self.descriptors[id.index()]
    }

    /// Descriptor for a raw numeric id, if registered.
    #[must_use]
    pub fn lookup(&self, raw: u8) -> Option<&StageDescriptor> {
        StageId::from_number(raw).map(|id| self.get(id))
    }

    /// The single stage producing an artifact.
    #[must_use]
    pub fn producer_of(&self, artifact: CanonicalArtifact) -> Option<StageId> {
        self.producers.get(&artifact).copied()
    }

    /// All descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.descriptors.iter()
    }

    /// Number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
