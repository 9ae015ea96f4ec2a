/// Block layout for cards
///
/// `build_visual` turns a card into a tree of `VisualNode`s with images already
/// decoded. The same placement walk then serves two purposes: measuring the
/// natural height at a fixed width, and emitting the positioned display list
/// that `raster` paints.

use super::paint::PaintCommand;
use super::ImageResolver;
use crate::card::{Action, Card, Element, ImageSize, TextBlock, TextSize, TextWeight};
use crate::style::{Color, HostStyle};
use image::RgbaImage;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub scale: u32,
    pub bold: bool,
    pub wrap: bool,
    pub color: Color,
}

#[derive(Debug, Clone)]
pub struct Picture {
    /// `None` when the image is missing or could not be decoded
    pub image: Option<Rc<RgbaImage>>,
    pub size: ImageSize,
}

#[derive(Debug, Clone)]
pub enum VisualNode {
    Text(TextRun),
    Picture(Picture),
    Gallery(Vec<Picture>),
    Stack {
        background: Option<Rc<RgbaImage>>,
        children: Vec<VisualNode>,
    },
    Columns(Vec<(f32, VisualNode)>),
    Facts(Vec<(TextRun, TextRun)>),
    Buttons(Vec<TextRun>),
}

/// A built card, ready to be measured and painted
#[derive(Debug, Clone)]
pub struct Visual {
    pub background: Option<Rc<RgbaImage>>,
    pub root: Vec<VisualNode>,
    style: Rc<HostStyle>,
}

impl Visual {
    pub fn style(&self) -> &HostStyle {
        &self.style
    }
}

pub fn build_visual(card: &Card, images: &dyn ImageResolver, style: Rc<HostStyle>) -> Visual {
    let mut builder = Builder {
        images,
        style: &style,
        decoded: HashMap::new(),
    };
    let background = card.background_image.as_deref().and_then(|u| builder.picture_source(u));
    let mut root = builder.elements(&card.body);
    if let Some(buttons) = builder.buttons(&card.actions) {
        root.push(buttons);
    }
    Visual {
        background,
        root,
        style,
    }
}

/// Natural height of `visual` at `width`, including card padding.
pub fn measure(visual: &Visual, width: u32) -> u32 {
    let mut layout = Layout::new(&visual.style, None);
    layout.root(visual, width)
}

/// Positioned paint commands for `visual` at `width`.
pub fn display_list(visual: &Visual, width: u32) -> Vec<PaintCommand> {
    let mut commands = Vec::new();
    let mut layout = Layout::new(&visual.style, Some(&mut commands));
    layout.root(visual, width);
    commands
}

/// Greedy word wrap to at most `chars_per_line` characters per line.
pub fn wrap_text(text: &str, chars_per_line: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut cur = String::new();
        for word in paragraph.split_whitespace() {
            if !cur.is_empty() && cur.chars().count() + word.chars().count() + 1 > chars_per_line {
                lines.push(std::mem::take(&mut cur));
            }
            if !cur.is_empty() {
                cur.push(' ');
            }
            cur.push_str(word);
        }
        if !cur.is_empty() {
            lines.push(cur);
        }
    }
    lines
}

struct Builder<'a> {
    images: &'a dyn ImageResolver,
    style: &'a HostStyle,
    // Decoded once per URL even when several nodes share it
    decoded: HashMap<String, Option<Rc<RgbaImage>>>,
}

impl Builder<'_> {
    fn picture_source(&mut self, url: &str) -> Option<Rc<RgbaImage>> {
        if let Some(hit) = self.decoded.get(url) {
            return hit.clone();
        }
        let img = self.decode(url);
        self.decoded.insert(url.to_string(), img.clone());
        img
    }

    fn decode(&self, url: &str) -> Option<Rc<RgbaImage>> {
        let mut cursor = self.images.resolve(url)?;
        let mut data = Vec::new();
        cursor.read_to_end(&mut data).ok()?;
        match image::load_from_memory(&data) {
            Ok(img) => Some(Rc::new(img.to_rgba8())),
            Err(e) => {
                log::debug!("image {} could not be decoded: {}", url, e);
                None
            }
        }
    }

    fn elements(&mut self, elements: &[Element]) -> Vec<VisualNode> {
        let mut nodes = Vec::new();
        for element in elements {
            match element {
                Element::TextBlock(t) => nodes.push(VisualNode::Text(self.text(t))),
                Element::Image(img) => nodes.push(VisualNode::Picture(Picture {
                    image: self.picture_source(&img.url),
                    size: img.size,
                })),
                Element::ImageSet(set) => {
                    let size = if set.image_size == ImageSize::Auto {
                        ImageSize::Medium
                    } else {
                        set.image_size
                    };
                    let pictures: Vec<_> = set
                        .images
                        .iter()
                        .map(|img| Picture {
                            image: self.picture_source(&img.url),
                            size,
                        })
                        .collect();
                    if !pictures.is_empty() {
                        nodes.push(VisualNode::Gallery(pictures));
                    }
                }
                Element::Container(c) => {
                    let background = c.background_image.as_deref().and_then(|u| self.picture_source(u));
                    nodes.push(VisualNode::Stack {
                        background,
                        children: self.elements(&c.items),
                    });
                }
                Element::ColumnSet(cs) => {
                    let columns: Vec<_> = cs
                        .columns
                        .iter()
                        .map(|col| {
                            let background = col.background_image.as_deref().and_then(|u| self.picture_source(u));
                            let weight = col.width.as_ref().map_or(1.0, |w| w.weight());
                            (
                                weight,
                                VisualNode::Stack {
                                    background,
                                    children: self.elements(&col.items),
                                },
                            )
                        })
                        .collect();
                    if !columns.is_empty() {
                        nodes.push(VisualNode::Columns(columns));
                    }
                }
                Element::FactSet(fs) => {
                    let rows = fs
                        .facts
                        .iter()
                        .map(|f| {
                            let title = TextRun {
                                text: f.title.clone(),
                                scale: 2,
                                bold: true,
                                wrap: true,
                                color: self.style.foreground,
                            };
                            let value = TextRun {
                                bold: false,
                                text: f.value.clone(),
                                ..title.clone()
                            };
                            (title, value)
                        })
                        .collect::<Vec<_>>();
                    if !rows.is_empty() {
                        nodes.push(VisualNode::Facts(rows));
                    }
                }
                Element::ActionSet(set) => nodes.extend(self.buttons(&set.actions)),
                Element::Unknown => {}
            }
        }
        nodes
    }

    fn text(&self, t: &TextBlock) -> TextRun {
        let scale = match t.size {
            TextSize::Small => 1,
            TextSize::Default => 2,
            TextSize::Medium => 3,
            TextSize::Large => 4,
            TextSize::ExtraLarge => 5,
        };
        TextRun {
            text: t.text.clone(),
            scale,
            bold: t.weight == TextWeight::Bolder,
            wrap: t.wrap,
            color: if t.is_subtle { self.style.subtle } else { self.style.foreground },
        }
    }

    // Raster output has no interaction: actions become static buttons.
    fn buttons(&self, actions: &[Action]) -> Option<VisualNode> {
        if actions.is_empty() {
            return None;
        }
        Some(VisualNode::Buttons(
            actions
                .iter()
                .map(|a| TextRun {
                    text: a.title.clone(),
                    scale: 2,
                    bold: false,
                    wrap: false,
                    color: self.style.background,
                })
                .collect(),
        ))
    }
}

struct Layout<'a> {
    unit: u32,
    padding: u32,
    spacing: u32,
    accent: Color,
    placeholder: Color,
    out: Option<&'a mut Vec<PaintCommand>>,
}

impl<'a> Layout<'a> {
    fn new(style: &HostStyle, out: Option<&'a mut Vec<PaintCommand>>) -> Self {
        Self {
            unit: style.glyph_unit.max(1),
            padding: style.padding,
            spacing: style.spacing,
            accent: style.accent,
            placeholder: style.placeholder,
            out,
        }
    }

    fn emit(&mut self, cmd: impl FnOnce() -> PaintCommand) {
        if let Some(out) = self.out.as_deref_mut() {
            out.push(cmd());
        }
    }

    fn measuring(&self) -> Layout<'static> {
        Layout {
            unit: self.unit,
            padding: self.padding,
            spacing: self.spacing,
            accent: self.accent,
            placeholder: self.placeholder,
            out: None,
        }
    }

    fn root(&mut self, visual: &Visual, width: u32) -> u32 {
        let inset = self.padding.saturating_mul(2);
        let inner = width.saturating_sub(inset);
        let p = self.padding as i32;
        self.stack(&visual.root, p, p, inner).saturating_add(inset)
    }

    fn stack(&mut self, nodes: &[VisualNode], x: i32, y: i32, width: u32) -> u32 {
        let mut h = 0u32;
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                h = h.saturating_add(self.spacing);
            }
            h = h.saturating_add(self.node(node, x, y + h as i32, width));
        }
        h
    }

    fn node(&mut self, node: &VisualNode, x: i32, y: i32, width: u32) -> u32 {
        match node {
            VisualNode::Text(run) => self.text(run, x, y, width),
            VisualNode::Picture(pic) => {
                let (w, h) = self.picture_box(pic, width);
                self.picture(pic, x, y, w, h);
                h
            }
            VisualNode::Gallery(pictures) => self.gallery(pictures, x, y, width),
            VisualNode::Stack { background, children } => match background {
                Some(bg) => {
                    let inset = self.padding;
                    let inner = width.saturating_sub(inset * 2);
                    let h = self.measuring().stack(children, 0, 0, inner) + inset * 2;
                    let bg = bg.clone();
                    self.emit(|| PaintCommand::Image {
                        x,
                        y,
                        width,
                        height: h,
                        image: bg,
                    });
                    self.stack(children, x + inset as i32, y + inset as i32, inner);
                    h
                }
                None => self.stack(children, x, y, width),
            },
            VisualNode::Columns(columns) => self.columns(columns, x, y, width),
            VisualNode::Facts(rows) => self.facts(rows, x, y, width),
            VisualNode::Buttons(titles) => self.buttons(titles, x, y, width),
        }
    }

    fn char_width(&self, scale: u32) -> u32 {
        self.unit.saturating_mul(4 * scale).max(1)
    }

    fn line_height(&self, scale: u32) -> u32 {
        self.unit.saturating_mul(6 * scale)
    }

    fn text_lines(&self, run: &TextRun, width: u32) -> Vec<String> {
        let per_line = (width / self.char_width(run.scale)).max(1) as usize;
        if run.wrap {
            wrap_text(&run.text, per_line)
        } else {
            run.text
                .lines()
                .next()
                .map(|l| vec![l.chars().take(per_line).collect()])
                .unwrap_or_default()
        }
    }

    fn text(&mut self, run: &TextRun, x: i32, y: i32, width: u32) -> u32 {
        let lines = self.text_lines(run, width);
        let line_h = self.line_height(run.scale);
        let glyph = self.unit * run.scale;
        for (i, line) in lines.iter().enumerate() {
            let ly = y + (i as u32 * line_h) as i32;
            self.emit(|| PaintCommand::Text {
                x,
                y: ly,
                text: line.clone(),
                unit: glyph,
                bold: run.bold,
                rgba: rgba(run.color),
            });
        }
        lines.len().max(1) as u32 * line_h
    }

    fn picture_box(&self, pic: &Picture, width: u32) -> (u32, u32) {
        let natural = pic.image.as_ref().map(|i| i.width());
        let w = match pic.size {
            ImageSize::Small => 40,
            ImageSize::Medium => 80,
            ImageSize::Large => 160,
            ImageSize::Stretch => width,
            ImageSize::Auto => natural.unwrap_or(80),
        }
        .min(width);
        let h = match &pic.image {
            Some(img) if img.width() > 0 => (img.height() as u64 * w as u64 / img.width() as u64) as u32,
            _ => w * 3 / 4,
        };
        (w, h)
    }

    fn picture(&mut self, pic: &Picture, x: i32, y: i32, w: u32, h: u32) {
        match &pic.image {
            Some(img) => {
                let img = img.clone();
                self.emit(|| PaintCommand::Image {
                    x,
                    y,
                    width: w,
                    height: h,
                    image: img,
                });
            }
            None => {
                let color = rgba(self.placeholder);
                self.emit(|| PaintCommand::SolidRect {
                    x,
                    y,
                    width: w,
                    height: h,
                    rgba: color,
                });
            }
        }
    }

    fn gallery(&mut self, pictures: &[Picture], x: i32, y: i32, width: u32) -> u32 {
        let (mut cx, mut cy, mut row_h) = (0u32, 0u32, 0u32);
        for pic in pictures {
            let (w, h) = self.picture_box(pic, width);
            if cx > 0 && cx + w > width {
                cy += row_h + self.spacing;
                cx = 0;
                row_h = 0;
            }
            self.picture(pic, x + cx as i32, y + cy as i32, w, h);
            cx += w + self.spacing;
            row_h = row_h.max(h);
        }
        cy + row_h
    }

    fn columns(&mut self, columns: &[(f32, VisualNode)], x: i32, y: i32, width: u32) -> u32 {
        let n = columns.len() as u32;
        let available = width.saturating_sub(self.spacing * n.saturating_sub(1));
        let total: f32 = columns.iter().map(|(w, _)| *w).sum();
        let (mut cx, mut used, mut h) = (0u32, 0u32, 0u32);
        for (i, (weight, node)) in columns.iter().enumerate() {
            // Last column takes the rounding remainder
            let w = if i as u32 == n - 1 {
                available.saturating_sub(used)
            } else {
                (available as f32 * weight / total) as u32
            };
            used += w;
            h = h.max(self.node(node, x + cx as i32, y, w));
            cx += w + self.spacing;
        }
        h
    }

    fn facts(&mut self, rows: &[(TextRun, TextRun)], x: i32, y: i32, width: u32) -> u32 {
        let title_w = width * 2 / 5;
        let value_x = x + (title_w + self.spacing) as i32;
        let value_w = width.saturating_sub(title_w + self.spacing);
        let gap = self.spacing / 2;
        let mut h = 0u32;
        for (i, (title, value)) in rows.iter().enumerate() {
            if i > 0 {
                h += gap;
            }
            let th = self.text(title, x, y + h as i32, title_w);
            let vh = self.text(value, value_x, y + h as i32, value_w);
            h += th.max(vh);
        }
        h
    }

    fn buttons(&mut self, titles: &[TextRun], x: i32, y: i32, width: u32) -> u32 {
        let n = titles.len() as u32;
        let inset = 4 * self.unit;
        let bw = width.saturating_sub(self.spacing * n.saturating_sub(1)) / n.max(1);
        let bh = self.line_height(2) + inset * 2;
        let accent = rgba(self.accent);
        for (i, title) in titles.iter().enumerate() {
            let bx = x + (i as u32 * (bw + self.spacing)) as i32;
            self.emit(|| PaintCommand::SolidRect {
                x: bx,
                y,
                width: bw,
                height: bh,
                rgba: accent,
            });
            self.text(title, bx + inset as i32, y + inset as i32, bw.saturating_sub(inset * 2));
        }
        bh
    }
}

fn rgba(c: Color) -> (u8, u8, u8, u8) {
    let [r, g, b, a] = c.0;
    (r, g, b, a)
}
