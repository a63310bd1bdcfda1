//! Collaborator contracts for taxonomy/configuration lookup and
//! canonical link resolution, plus a static in-memory provider.

use hashbrown::HashMap;

use crate::types::OptionId;

/// One configured custom form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    /// Field name, keys into the element's custom data.
    pub name: String,
    /// Form widget type.
    pub field_type: String,
    /// Semantic vocabulary term, when the field is mapped into the
    /// JSON-LD view.
    pub semantic: Option<String>,
}

/// Resolves taxonomy names and exposes the view configuration.
pub trait TaxonomyProvider: Send + Sync {
    /// Display name for a taxonomy option, `None` when the option no
    /// longer exists.
    fn option_name(&self, id: OptionId) -> Option<String>;

    /// Configured custom form fields.
    fn form_fields(&self) -> &[FormField];

    /// Property names redirected from the public view into the private
    /// one (typically `images`/`files`).
    fn private_properties(&self) -> &[String];

    /// Field names embedded in the compact map-marker view.
    fn compact_fields(&self) -> &[String];
}

/// Produces the canonical self-link embedded in the semantic view.
pub trait LinkResolver: Send + Sync {
    /// Absolute URI for an element id.
    fn element_uri(&self, id: &str) -> String;
}

/// Fixed in-memory taxonomy/configuration, for embedders without a
/// dynamic configuration store and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTaxonomy {
    options: HashMap<OptionId, String>,
    form_fields: Vec<FormField>,
    private_properties: Vec<String>,
    compact_fields: Vec<String>,
}

impl StaticTaxonomy {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a taxonomy option.
    pub fn with_option(mut self, id: OptionId, name: impl Into<String>) -> Self {
        self.options.insert(id, name.into());
        self
    }

    /// Registers a custom form field.
    pub fn with_form_field(
        mut self,
        name: impl Into<String>,
        field_type: impl Into<String>,
        semantic: Option<&str>,
    ) -> Self {
        self.form_fields.push(FormField {
            name: name.into(),
            field_type: field_type.into(),
            semantic: semantic.map(str::to_string),
        });
        self
    }

    /// Marks a property as private-view only.
    pub fn with_private_property(mut self, name: impl Into<String>) -> Self {
        self.private_properties.push(name.into());
        self
    }

    /// Adds a field to the compact marker payload.
    pub fn with_compact_field(mut self, name: impl Into<String>) -> Self {
        self.compact_fields.push(name.into());
        self
    }
}

impl TaxonomyProvider for StaticTaxonomy {
    fn option_name(&self, id: OptionId) -> Option<String> {
        self.options.get(&id).cloned()
    }

    fn form_fields(&self) -> &[FormField] {
        &self.form_fields
    }

    fn private_properties(&self) -> &[String] {
        &self.private_properties
    }

    fn compact_fields(&self) -> &[String] {
        &self.compact_fields
    }
}

/// Link resolver producing `<base>/api/elements/<id>.jsonld`.
#[derive(Debug, Clone)]
pub struct BaseUrlResolver {
    base: String,
}

impl BaseUrlResolver {
    /// Creates a resolver rooted at `base` (no trailing slash needed).
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }
}

impl LinkResolver for BaseUrlResolver {
    fn element_uri(&self, id: &str) -> String {
        format!("{}/api/elements/{id}.jsonld", self.base)
    }
}
