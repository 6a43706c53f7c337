//! Candidate selection.
//!
//! A `Filter` is a pure predicate over container snapshots, composed from
//! the positional name list, the disable list, the enable-label requirement
//! and the scope. Its description string is deterministic so it can appear
//! in the startup notification.

use crate::container::Container;

#[derive(Debug, Clone, Default)]
pub struct Filter {
    names: Vec<String>,
    disabled: Vec<String>,
    require_enable_label: bool,
    scope: String,
    /// When set, only containers running one of these image references
    /// match. Used by the HTTP trigger.
    images: Option<Vec<String>>,
}

impl Filter {
    pub fn build(
        names: Vec<String>,
        disabled: Vec<String>,
        require_enable_label: bool,
        scope: String,
    ) -> Self {
        Self {
            names,
            disabled,
            require_enable_label,
            scope,
            images: None,
        }
    }

    /// Restrict this filter to containers whose image matches any of the
    /// given references.
    pub fn narrow_to_images(mut self, images: Vec<String>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn matches(&self, container: &Container) -> bool {
        // Other supervisor instances are the sanity check's business, never
        // update candidates.
        if container.is_supervisor() {
            return false;
        }

        // An explicit enable=false is an operator opt-out.
        match container.enabled() {
            Some(false) => return false,
            Some(true) => {}
            None if self.require_enable_label => return false,
            None => {}
        }

        if !self.scope.is_empty() && container.scope() != Some(self.scope.as_str()) {
            return false;
        }

        let name = container.name();
        if !self.names.is_empty() && !self.names.iter().any(|n| n == name) {
            return false;
        }
        if self.disabled.iter().any(|n| n == name) {
            return false;
        }

        if let Some(images) = &self.images {
            let image = container.image_ref().unwrap_or_default();
            if !images.iter().any(|i| i == image) {
                return false;
            }
        }

        true
    }

    /// Stable human-readable description for the startup message.
    pub fn describe(&self) -> String {
        let mut desc = if self.names.is_empty() {
            "Watching all containers".to_string()
        } else {
            format!("Watching containers: {}", self.names.join(", "))
        };
        if !self.disabled.is_empty() {
            desc.push_str(&format!(", except: {}", self.disabled.join(", ")));
        }
        if self.require_enable_label {
            desc.push_str(", only those with the enable label");
        }
        if !self.scope.is_empty() {
            desc.push_str(&format!(", within scope \"{}\"", self.scope));
        }
        desc
    }
}
