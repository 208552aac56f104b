//! Build configuration attached to build and update calls.

use std::collections::BTreeSet;

use crate::state::DocumentState;

/// Validation settings for one build pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Category labels to run. `None` means every category the validator
    /// registers.
    pub categories: Option<BTreeSet<String>>,
    /// Forwarded to the validator: stop category checks early when the
    /// document carries unresolved references.
    pub stop_after_linking_errors: bool,
}

impl ValidationOptions {
    pub fn all() -> Self {
        Self {
            categories: None,
            stop_after_linking_errors: false,
        }
    }

    pub fn categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: Some(categories.into_iter().map(Into::into).collect()),
            stop_after_linking_errors: false,
        }
    }
}

/// Options for a single `build`/`update` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// `None` disables validation; the build stops after reference
    /// indexing (or after linking, when linking is deferred).
    pub validation: Option<ValidationOptions>,
    /// When false, the linker is not invoked: documents are marked
    /// `Linked` with an empty reference list and resolution is left to
    /// on-demand queries. Deferred documents contribute no dependency
    /// edges, which is why eager linking is the default.
    pub eager_linking: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            validation: None,
            eager_linking: true,
        }
    }
}

impl BuildOptions {
    /// Validate with every registered category.
    pub fn validate_all() -> Self {
        Self {
            validation: Some(ValidationOptions::all()),
            ..Self::default()
        }
    }

    /// The state a document governed by these options is built up to.
    pub fn target_state(&self) -> DocumentState {
        if self.validation.is_some() {
            DocumentState::Validated
        } else if self.eager_linking {
            DocumentState::IndexedReferences
        } else {
            DocumentState::Linked
        }
    }

    /// Merge previously recorded options with a fresh request.
    ///
    /// Requested category sets are united so a partial update never loses a
    /// category that an earlier call asked for; an unspecified set means
    /// "all" and absorbs any union. Boolean flags take the fresh value.
    pub fn merged_with(&self, fresh: &BuildOptions) -> BuildOptions {
        let validation = match (&self.validation, &fresh.validation) {
            (None, None) => None,
            (Some(previous), None) => Some(previous.clone()),
            (None, Some(new)) => Some(new.clone()),
            (Some(previous), Some(new)) => Some(ValidationOptions {
                categories: match (&previous.categories, &new.categories) {
                    (None, _) | (_, None) => None,
                    (Some(a), Some(b)) => Some(a.union(b).cloned().collect()),
                },
                stop_after_linking_errors: new.stop_after_linking_errors,
            }),
        };
        BuildOptions {
            validation,
            eager_linking: fresh.eager_linking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_target_is_indexed_references() {
        assert_eq!(
            BuildOptions::default().target_state(),
            DocumentState::IndexedReferences
        );
    }

    #[test]
    fn deferred_linking_targets_linked() {
        let options = BuildOptions {
            eager_linking: false,
            ..BuildOptions::default()
        };
        assert_eq!(options.target_state(), DocumentState::Linked);
    }

    #[test]
    fn validation_targets_validated() {
        assert_eq!(
            BuildOptions::validate_all().target_state(),
            DocumentState::Validated
        );
    }

    #[test]
    fn merge_unites_category_sets() {
        let previous = BuildOptions {
            validation: Some(ValidationOptions::categories(["references"])),
            ..BuildOptions::default()
        };
        let fresh = BuildOptions {
            validation: Some(ValidationOptions::categories(["style"])),
            ..BuildOptions::default()
        };
        let merged = previous.merged_with(&fresh);
        let categories = merged
            .validation
            .expect("validation requested")
            .categories
            .expect("explicit categories");
        assert_eq!(
            categories,
            BTreeSet::from(["references".to_string(), "style".to_string()])
        );
    }

    #[test]
    fn merge_all_absorbs_explicit_sets() {
        let previous = BuildOptions {
            validation: Some(ValidationOptions::categories(["references"])),
            ..BuildOptions::default()
        };
        let merged = previous.merged_with(&BuildOptions::validate_all());
        assert_eq!(
            merged.validation.expect("validation requested").categories,
            None
        );
    }

    #[test]
    fn merge_keeps_previous_validation_when_fresh_has_none() {
        let previous = BuildOptions {
            validation: Some(ValidationOptions::categories(["references"])),
            ..BuildOptions::default()
        };
        let merged = previous.merged_with(&BuildOptions::default());
        assert!(merged.validation.is_some());
    }
}
