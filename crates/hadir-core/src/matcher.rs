//! Face-match policy.
//!
//! Descriptor extraction is delegated to a [`DescriptorExtractor`]; this
//! module owns only the decision: euclidean descriptor distance below
//! [`MATCH_DISTANCE_THRESHOLD`] is a match.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Descriptor distance below which two faces are the same person.
pub const MATCH_DISTANCE_THRESHOLD: f32 = 0.6;

/// Which side of a comparison an image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Reference,
    Candidate,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRole::Reference => f.write_str("registered photo"),
            ImageRole::Candidate => f.write_str("captured photo"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("no face detected in {0}")]
    NoFace(ImageRole),
    #[error("face matcher unavailable: {0}")]
    Unavailable(String),
    #[error("descriptors cannot be compared ({reference} vs {candidate} values)")]
    Incomparable { reference: usize, candidate: usize },
}

/// Face descriptor vector (128-dimensional for the usual extractors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    /// Euclidean distance between two descriptors. Lower = more similar.
    ///
    /// `None` when either descriptor is empty or the lengths differ.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Option<f32> {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }
}

/// Outcome of comparing a reference face with a candidate face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchVerdict {
    pub is_match: bool,
    /// Similarity in [0, 100]; higher = more similar.
    pub score: f32,
    /// Raw descriptor distance, when the matcher exposes one.
    pub distance: Option<f32>,
}

impl MatchVerdict {
    /// Apply the fixed match policy to a descriptor distance.
    pub fn from_distance(distance: f32) -> Self {
        Self {
            is_match: distance < MATCH_DISTANCE_THRESHOLD,
            score: ((1.0 - distance) * 100.0).clamp(0.0, 100.0),
            distance: Some(distance),
        }
    }
}

/// Strategy for deciding whether two face images show the same person.
#[async_trait]
pub trait FaceMatcher: Send + Sync {
    async fn compare(&self, reference: &str, candidate: &str) -> Result<MatchVerdict, MatcherError>;

    async fn detect(&self, image: &str) -> Result<bool, MatcherError>;
}

/// Turns an image into a face descriptor. `Ok(None)` means no face was found.
#[async_trait]
pub trait DescriptorExtractor: Send + Sync {
    async fn extract(&self, image: &str) -> Result<Option<Descriptor>, MatcherError>;
}

/// [`FaceMatcher`] that compares extractor descriptors under the fixed threshold.
pub struct DescriptorMatcher<E> {
    extractor: E,
}

impl<E: DescriptorExtractor> DescriptorMatcher<E> {
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl<E: DescriptorExtractor> FaceMatcher for DescriptorMatcher<E> {
    async fn compare(&self, reference: &str, candidate: &str) -> Result<MatchVerdict, MatcherError> {
        let reference = self
            .extractor
            .extract(reference)
            .await?
            .ok_or(MatcherError::NoFace(ImageRole::Reference))?;
        let candidate = self
            .extractor
            .extract(candidate)
            .await?
            .ok_or(MatcherError::NoFace(ImageRole::Candidate))?;

        let distance = reference.euclidean_distance(&candidate).ok_or(MatcherError::Incomparable {
            reference: reference.values.len(),
            candidate: candidate.values.len(),
        })?;
        let verdict = MatchVerdict::from_distance(distance);
        tracing::debug!(
            distance = ?verdict.distance,
            score = verdict.score,
            is_match = verdict.is_match,
            "face comparison"
        );
        Ok(verdict)
    }

    async fn detect(&self, image: &str) -> Result<bool, MatcherError> {
        Ok(self.extractor.extract(image).await?.is_some())
    }
}
