//! Card document model
//!
//! A card is a tree of elements parsed from the Adaptive Card JSON shape. Only
//! the subset needed for static raster output is modeled; unknown element types
//! deserialize to [`Element::Unknown`] and are skipped by layout and traversal.
//!
//! Traversal goes through [`walk`], which drives a [`Visitor`] over every node,
//! including arbitrarily nested containers and columns.

use crate::Result;
use serde::{Deserialize, Deserializer};
use std::path::Path;

/// Root of a card document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "de_background")]
    pub background_image: Option<String>,
    #[serde(default)]
    pub body: Vec<Element>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Card {
    /// Parse a card from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a card from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}

/// The closed set of element kinds
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Element {
    TextBlock(TextBlock),
    Image(Image),
    ImageSet(ImageSet),
    Container(Container),
    ColumnSet(ColumnSet),
    FactSet(FactSet),
    ActionSet(ActionSet),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    #[serde(default)]
    pub size: TextSize,
    #[serde(default)]
    pub weight: TextWeight,
    #[serde(default)]
    pub wrap: bool,
    #[serde(default)]
    pub is_subtle: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextSize {
    Small,
    #[default]
    Default,
    Medium,
    Large,
    ExtraLarge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextWeight {
    Lighter,
    #[default]
    Default,
    Bolder,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub size: ImageSize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageSize {
    #[default]
    Auto,
    Stretch,
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSet {
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub image_size: ImageSize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default)]
    pub items: Vec<Element>,
    #[serde(default, deserialize_with = "de_background")]
    pub background_image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSet {
    #[serde(default)]
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    #[serde(default)]
    pub items: Vec<Element>,
    #[serde(default)]
    pub width: Option<ColumnWidth>,
    #[serde(default, deserialize_with = "de_background")]
    pub background_image: Option<String>,
}

/// Column width: a relative weight or a keyword ("auto", "stretch")
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ColumnWidth {
    Weight(f32),
    Keyword(String),
}

impl ColumnWidth {
    /// Relative weight used when splitting a column set; keywords and
    /// non-positive values count as 1.
    pub fn weight(&self) -> f32 {
        match self {
            ColumnWidth::Weight(w) if *w > 0.0 => *w,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactSet {
    #[serde(default)]
    pub facts: Vec<Fact>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fact {
    pub title: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionSet {
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// A card action. Raster output never supports interaction, so actions are
/// drawn as static buttons.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
}

// `backgroundImage` is either a bare URL or `{ "url": "..." }`.
fn de_background<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Background {
        Url(String),
        Object { url: Option<String> },
    }

    let bg = Option::<Background>::deserialize(deserializer)?;
    Ok(match bg {
        Some(Background::Url(u)) => Some(u),
        Some(Background::Object { url }) => url,
        None => None,
    }
    .filter(|u| !u.is_empty()))
}

/// Callbacks invoked by [`walk`]. All methods default to no-ops so visitors
/// only override what they need.
pub trait Visitor {
    /// Called for the card background and for container/column backgrounds
    fn visit_background(&mut self, _url: &str) {}

    /// Called for every image, including those inside image sets
    fn visit_image(&mut self, _image: &Image) {}
}

/// Walk the whole card depth-first in document order.
pub fn walk<V: Visitor + ?Sized>(card: &Card, visitor: &mut V) {
    if let Some(bg) = &card.background_image {
        visitor.visit_background(bg);
    }
    walk_elements(&card.body, visitor);
}

fn walk_elements<V: Visitor + ?Sized>(elements: &[Element], visitor: &mut V) {
    for element in elements {
        match element {
            Element::Image(image) => visitor.visit_image(image),
            Element::ImageSet(set) => {
                for image in &set.images {
                    visitor.visit_image(image);
                }
            }
            Element::Container(c) => {
                if let Some(bg) = &c.background_image {
                    visitor.visit_background(bg);
                }
                walk_elements(&c.items, visitor);
            }
            Element::ColumnSet(cs) => {
                for column in &cs.columns {
                    if let Some(bg) = &column.background_image {
                        visitor.visit_background(bg);
                    }
                    walk_elements(&column.items, visitor);
                }
            }
            Element::TextBlock(_) | Element::FactSet(_) | Element::ActionSet(_) | Element::Unknown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = r#"{
        "type": "AdaptiveCard",
        "version": "1.5",
        "backgroundImage": { "url": "https://x/bg.png" },
        "body": [
            { "type": "TextBlock", "text": "Hello", "size": "large", "weight": "bolder" },
            { "type": "Container", "items": [
                { "type": "ColumnSet", "columns": [
                    { "type": "Column", "width": 2, "items": [
                        { "type": "Image", "url": "https://x/a.png" }
                    ]},
                    { "type": "Column", "width": "auto", "backgroundImage": "https://x/col.png", "items": [] }
                ]}
            ]},
            { "type": "Media", "sources": [] },
            { "type": "ImageSet", "images": [ { "url": "https://x/b.png" }, { "url": "https://x/a.png" } ] }
        ],
        "actions": [ { "type": "Action.OpenUrl", "title": "Open" } ]
    }"#;

    #[derive(Default)]
    struct Recorder {
        backgrounds: Vec<String>,
        images: Vec<String>,
    }

    impl Visitor for Recorder {
        fn visit_background(&mut self, url: &str) {
            self.backgrounds.push(url.to_string());
        }
        fn visit_image(&mut self, image: &Image) {
            self.images.push(image.url.clone());
        }
    }

    #[test]
    fn parses_nested_card() {
        let card = Card::from_json(NESTED).unwrap();
        assert_eq!(card.background_image.as_deref(), Some("https://x/bg.png"));
        assert_eq!(card.body.len(), 4);
        assert!(matches!(card.body[2], Element::Unknown));
        match &card.body[0] {
            Element::TextBlock(t) => {
                assert_eq!(t.size, TextSize::Large);
                assert_eq!(t.weight, TextWeight::Bolder);
            }
            other => panic!("unexpected element {:?}", other),
        }
    }

    #[test]
    fn walk_reaches_every_nested_reference() {
        let card = Card::from_json(NESTED).unwrap();
        let mut rec = Recorder::default();
        walk(&card, &mut rec);
        assert_eq!(rec.backgrounds, vec!["https://x/bg.png", "https://x/col.png"]);
        assert_eq!(rec.images, vec!["https://x/a.png", "https://x/b.png", "https://x/a.png"]);
    }

    #[test]
    fn empty_background_is_none() {
        let card = Card::from_json(r#"{"backgroundImage": "", "body": []}"#).unwrap();
        assert!(card.background_image.is_none());
    }

    #[test]
    fn column_width_weight() {
        assert_eq!(ColumnWidth::Weight(3.0).weight(), 3.0);
        assert_eq!(ColumnWidth::Keyword("stretch".into()).weight(), 1.0);
        assert_eq!(ColumnWidth::Weight(-1.0).weight(), 1.0);
    }
}
