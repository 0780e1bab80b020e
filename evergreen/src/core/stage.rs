//! Stage identifiers and the enums that classify them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one of the ten stages of the content pipeline.
///
/// The set is closed: adding or removing a stage is a compile-time change
/// that every exhaustive `match` over this enum has to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StageId {
    /// Compresses very long transcripts before anything else reads them.
    Preprocessing = 0,
    /// Produces the canonical episode crux.
    TranscriptAnalysis = 1,
    /// Produces the canonical verbatim quote set.
    QuoteExtraction = 2,
    /// High-level blog outline.
    BlogOutline = 3,
    /// Per-section paragraph plans.
    ParagraphDetails = 4,
    /// Headlines, subheadings and hooks.
    Headlines = 5,
    /// Long-form article draft.
    DraftGeneration = 6,
    /// Editorial refinement of the draft.
    Refinement = 7,
    /// Platform-specific social posts.
    SocialContent = 8,
    /// Email campaign copy.
    EmailCampaign = 9,
}

impl StageId {
    /// Number of stages in the graph.
    pub const COUNT: usize = 10;

    /// Every stage, in id order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Preprocessing,
        Self::TranscriptAnalysis,
        Self::QuoteExtraction,
        Self::BlogOutline,
        Self::ParagraphDetails,
        Self::Headlines,
        Self::DraftGeneration,
        Self::Refinement,
        Self::SocialContent,
        Self::EmailCampaign,
    ];

    /// Returns the numeric id (0-9).
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Returns the slot index used by the context accumulator.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Resolves a numeric id, returning `None` outside the registered set.
    #[must_use]
    pub const fn from_number(number: u8) -> Option<Self> {
        match number {
            0 => Some(Self::Preprocessing),
            1 => Some(Self::TranscriptAnalysis),
            2 => Some(Self::QuoteExtraction),
            3 => Some(Self::BlogOutline),
            4 => Some(Self::ParagraphDetails),
            5 => Some(Self::Headlines),
            6 => Some(Self::DraftGeneration),
            7 => Some(Self::Refinement),
            8 => Some(Self::SocialContent),
            9 => Some(Self::EmailCampaign),
            _ => None,
        }
    }

    /// Machine-friendly name, also used as the template name.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Preprocessing => "preprocessing",
            Self::TranscriptAnalysis => "transcript_analysis",
            Self::QuoteExtraction => "quote_extraction",
            Self::BlogOutline => "blog_outline",
            Self::ParagraphDetails => "paragraph_details",
            Self::Headlines => "headlines",
            Self::DraftGeneration => "draft_generation",
            Self::Refinement => "refinement",
            Self::SocialContent => "social_content",
            Self::EmailCampaign => "email_campaign",
        }
    }

    /// Human-readable name shown in reports and failures.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Preprocessing => "Transcript Preprocessing",
            Self::TranscriptAnalysis => "Transcript Analysis",
            Self::QuoteExtraction => "Quote Extraction",
            Self::BlogOutline => "Blog Outline",
            Self::ParagraphDetails => "Paragraph Details",
            Self::Headlines => "Headlines & Copy",
            Self::DraftGeneration => "Draft Generation",
            Self::Refinement => "Refinement Pass",
            Self::SocialContent => "Social Content",
            Self::EmailCampaign => "Email Campaign",
        }
    }

    /// The logical phase this stage belongs to.
    #[must_use]
    pub const fn phase(self) -> Phase {
        match self {
            Self::Preprocessing => Phase::Pregate,
            Self::TranscriptAnalysis | Self::QuoteExtraction => Phase::Extract,
            Self::BlogOutline | Self::ParagraphDetails | Self::Headlines => Phase::Plan,
            Self::DraftGeneration | Self::Refinement => Phase::Write,
            Self::SocialContent | Self::EmailCampaign => Phase::Distribute,
        }
    }

    /// How the stage's output is validated.
    #[must_use]
    pub const fn kind(self) -> StageKind {
        match self {
            Self::Preprocessing => StageKind::Preprocessing,
            Self::TranscriptAnalysis
            | Self::QuoteExtraction
            | Self::BlogOutline
            | Self::ParagraphDetails
            | Self::Headlines => StageKind::Extraction,
            Self::DraftGeneration
            | Self::Refinement
            | Self::SocialContent
            | Self::EmailCampaign => StageKind::Generative,
        }
    }
}

impl TryFrom<u8> for StageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_number(value).ok_or(value)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Logical pipeline phase a stage belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Size gate and optional compression.
    Pregate,
    /// Canonical extraction (crux, quotes).
    Extract,
    /// Structural planning (outline, details, headlines).
    Plan,
    /// Long-form writing.
    Write,
    /// Distribution copy (social, email).
    Distribute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pregate => write!(f, "pregate"),
            Self::Extract => write!(f, "extract"),
            Self::Plan => write!(f, "plan"),
            Self::Write => write!(f, "write"),
            Self::Distribute => write!(f, "distribute"),
        }
    }
}

/// Model provider back-end selected per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Higher-quality long-context provider.
    Anthropic,
    /// Lower-cost structured-output provider.
    OpenAi,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Validation regime a stage runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Compression; failing the minimums is a hard failure with no retry.
    Preprocessing,
    /// Structured JSON against a required schema; violations are hard errors.
    Extraction,
    /// Prose with a soft quality bar; retried, then tolerated.
    Generative,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preprocessing => write!(f, "preprocessing"),
            Self::Extraction => write!(f, "extraction"),
            Self::Generative => write!(f, "generative"),
        }
    }
}
