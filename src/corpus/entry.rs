//! Catalog entry and its identifier newtype.

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Unique identifier for a catalog entry, from the external dataset.
///
/// Uses NonZeroU32 internally for memory efficiency. The identifier 0 is
/// reserved as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub NonZeroU32);

impl EntryId {
    /// Create a new EntryId. Returns None if id is 0.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Get the raw value.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// Interpret a query string as a literal identifier.
    ///
    /// Returns Some only when the trimmed text is a positive base-10
    /// integer that fits the identifier range.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        text.trim().parse::<u32>().ok().and_then(Self::new)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

/// One product record from the cleaned catalog.
///
/// `combined_text` is derived, never stored independently: it is the
/// concatenation of title, description, bullet points, and brand, and is
/// rewritten whenever the description changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub title: String,
    pub description: String,
    pub bullet_points: String,
    pub brand: String,
    pub color: String,
    pub locale: String,
    pub combined_text: String,
}

impl Entry {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        id: EntryId,
        title: String,
        description: String,
        bullet_points: String,
        brand: String,
        color: String,
        locale: String,
    ) -> Self {
        let combined_text = derive_combined_text(&title, &description, &bullet_points, &brand);
        Self {
            id,
            title,
            description,
            bullet_points,
            brand,
            color,
            locale,
            combined_text,
        }
    }

    /// Replace the description and refresh the derived text.
    pub fn set_description(&mut self, description: String) {
        self.description = description;
        self.combined_text = derive_combined_text(
            &self.title,
            &self.description,
            &self.bullet_points,
            &self.brand,
        );
    }

    /// Render the entry as a single context line for prompt assembly.
    #[must_use]
    pub fn context_line(&self) -> String {
        format!(
            "ID: {}, Name: {}, Description: {}, Key Facts: {}, Brand: {}, Color: {}, Location: {}",
            self.id,
            self.title,
            self.description,
            self.bullet_points,
            self.brand,
            self.color,
            self.locale
        )
    }
}

fn derive_combined_text(title: &str, description: &str, bullets: &str, brand: &str) -> String {
    format!("{title} {description} {bullets} {brand}")
}
