//! The closed set of outbound dependencies.
//!
//! Every outbound call is attributed to exactly one [`Dependency`]. Per
//! dependency state and settings live in a [`PerDependency`] table, which has
//! one slot per variant, so a missing entry cannot exist at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical outbound dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dependency {
    /// Secret store holding provider credentials
    SecretStore,
    /// Identity provider verification material
    TokenValidator,
    /// Hosted language-model completion service
    CompletionService,
    /// Speech synthesis service
    SpeechService,
}

impl Dependency {
    /// All dependencies, in a stable order
    pub const ALL: [Self; 4] = [
        Self::SecretStore,
        Self::TokenValidator,
        Self::CompletionService,
        Self::SpeechService,
    ];

    /// Stable name used in logs and metrics
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SecretStore => "secret-store",
            Self::TokenValidator => "token-validator",
            Self::CompletionService => "completion-service",
            Self::SpeechService => "speech-service",
        }
    }

    /// How the application should treat the dependency when unhealthy
    #[must_use]
    pub fn criticality(self) -> Criticality {
        match self {
            Self::SecretStore | Self::TokenValidator => Criticality::FailClosed,
            Self::CompletionService | Self::SpeechService => Criticality::Degradable,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure policy class of a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Requests needing the dependency are denied while it is unhealthy
    FailClosed,
    /// Callers are expected to fall back while it is unhealthy
    Degradable,
}

/// A value per dependency
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerDependency<T> {
    /// Secret store slot
    pub secret_store: T,
    /// Token validator slot
    pub token_validator: T,
    /// Completion service slot
    pub completion_service: T,
    /// Speech service slot
    pub speech_service: T,
}

impl<T> PerDependency<T> {
    /// Build a table by calling `f` for every dependency
    pub fn from_fn(mut f: impl FnMut(Dependency) -> T) -> Self {
        Self {
            secret_store: f(Dependency::SecretStore),
            token_validator: f(Dependency::TokenValidator),
            completion_service: f(Dependency::CompletionService),
            speech_service: f(Dependency::SpeechService),
        }
    }

    /// Get the slot for a dependency
    #[must_use]
    pub fn get(&self, dependency: Dependency) -> &T {
        match dependency {
            Dependency::SecretStore => &self.secret_store,
            Dependency::TokenValidator => &self.token_validator,
            Dependency::CompletionService => &self.completion_service,
            Dependency::SpeechService => &self.speech_service,
        }
    }

    /// Get the slot for a dependency mutably
    pub fn get_mut(&mut self, dependency: Dependency) -> &mut T {
        match dependency {
            Dependency::SecretStore => &mut self.secret_store,
            Dependency::TokenValidator => &mut self.token_validator,
            Dependency::CompletionService => &mut self.completion_service,
            Dependency::SpeechService => &mut self.speech_service,
        }
    }

    /// Transform every slot
    pub fn map<U>(&self, mut f: impl FnMut(Dependency, &T) -> U) -> PerDependency<U> {
        PerDependency::from_fn(|dep| f(dep, self.get(dep)))
    }

    /// Iterate over `(dependency, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (Dependency, &T)> {
        Dependency::ALL.into_iter().map(move |dep| (dep, self.get(dep)))
    }
}
