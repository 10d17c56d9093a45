//! Block-flow layout of a captured region.
//!
//! Blocks are stacked vertically with fixed margins and padding; text is
//! wrapped on a fixed glyph grid so the layout is deterministic.

use image::Rgb;
use scraper::{ElementRef, Node};

use super::resources::ImageSet;

/// Width of one glyph cell at text scale 1, in CSS pixels
pub const GLYPH_WIDTH: u32 = 8;
/// Height of one text line at text scale 1, in CSS pixels
pub const LINE_HEIGHT: u32 = 10;

const EDGE: u32 = 8;
const LIST_INDENT: u32 = 16;
const IMAGE_PLACEHOLDER: u32 = 16;

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

const SKIPPED: &[&str] = &[
    "script", "style", "head", "title", "meta", "link", "template", "noscript",
];
const INLINE: &[&str] = &[
    "span", "a", "b", "strong", "i", "em", "u", "small", "label", "code", "sup", "sub", "br",
    "mark", "abbr", "time",
];
/// Blocks whose children are flattened into text
const TEXT_ONLY: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "tr", "img", "hr",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxModel {
    pub margin: u32,
    pub border: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBox {
    pub rect: Rect,
    pub box_model: BoxModel,
}

impl LayoutBox {
    pub fn content_width(&self) -> u32 {
        let total = self.box_model.border + self.box_model.padding;
        self.rect.width.saturating_sub(total * 2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Heading(u8),
    Paragraph,
    ListItem,
    TableCell,
    Rule,
    Image,
    /// Bare text inside a container
    Text,
    /// Background fill of a container spanning its children
    Background,
}

/// A positioned box plus what to draw in it.
#[derive(Debug, Clone)]
pub struct LayoutNode {
    pub lb: LayoutBox,
    /// Wrapped text, one line per `\n`
    pub text: String,
    pub elem_type: ElementType,
    pub scale: u32,
    pub color: Rgb<u8>,
    pub background: Option<Rgb<u8>>,
    pub image_src: Option<String>,
}

impl LayoutNode {
    fn new(elem_type: ElementType, rect: Rect, box_model: BoxModel) -> Self {
        Self {
            lb: LayoutBox { rect, box_model },
            text: String::new(),
            elem_type,
            scale: 1,
            color: BLACK,
            background: None,
            image_src: None,
        }
    }

    fn bottom(&self) -> u32 {
        (self.lb.rect.y.max(0) as u32).saturating_add(self.lb.rect.height)
    }
}

/// The subset of an element's `style` attribute the layout honours.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineStyle {
    pub color: Option<Rgb<u8>>,
    pub background: Option<Rgb<u8>>,
    pub hidden: bool,
}

impl InlineStyle {
    pub fn parse(style: &str) -> Self {
        let mut parsed = Self::default();
        for decl in style.split(';') {
            let Some((key, value)) = decl.split_once(':') else {
                continue;
            };
            let value = value.trim().to_ascii_lowercase();
            match key.trim().to_ascii_lowercase().as_str() {
                "display" => parsed.hidden |= value == "none",
                "visibility" => parsed.hidden |= value == "hidden",
                "color" => parsed.color = parse_color(&value),
                "background-color" => parsed.background = parse_color(&value),
                "background" => {
                    parsed.background = parse_color(&value)
                        .or_else(|| value.split_whitespace().find_map(parse_color));
                }
                _ => {}
            }
        }
        parsed
    }

    pub fn of(el: ElementRef<'_>) -> Self {
        let mut style = el.value().attr("style").map(Self::parse).unwrap_or_default();
        style.hidden |= el.value().attr("hidden").is_some();
        style
    }
}

/// Whether the element itself is hidden (not its ancestors).
pub fn is_hidden(el: ElementRef<'_>) -> bool {
    InlineStyle::of(el).hidden
}

/// Whether the flow under `root` paints `el` as a block of its own.
///
/// `el` and every ancestor below `root` must be visible, and no ancestor may
/// be skipped, inline, or a block that only contributes its text.
pub fn is_painted(el: ElementRef<'_>, root: ElementRef<'_>) -> bool {
    if is_hidden(el) {
        return false;
    }
    for ancestor in el.ancestors().filter_map(ElementRef::wrap) {
        if ancestor.id() == root.id() {
            return true;
        }
        let tag = ancestor.value().name();
        if SKIPPED.contains(&tag)
            || INLINE.contains(&tag)
            || TEXT_ONLY.contains(&tag)
            || is_hidden(ancestor)
        {
            return false;
        }
    }
    false
}

/// Parse `#rgb`, `#rrggbb`, `rgb()`/`rgba()` and a few named colours.
pub fn parse_color(value: &str) -> Option<Rgb<u8>> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        let digits: Vec<u8> = hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<_>>()?;
        return match digits.as_slice() {
            [r, g, b] => Some(Rgb([r * 17, g * 17, b * 17])),
            [r1, r2, g1, g2, b1, b2] => Some(Rgb([r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2])),
            _ => None,
        };
    }
    if let Some(args) = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let channels: Vec<u8> = args
            .split(',')
            .take(3)
            .map(|c| c.trim().parse::<f32>().ok().map(|v| v.clamp(0.0, 255.0) as u8))
            .collect::<Option<_>>()?;
        return match channels.as_slice() {
            [r, g, b] => Some(Rgb([*r, *g, *b])),
            _ => None,
        };
    }
    match value {
        "black" => Some(BLACK),
        "white" => Some(Rgb([255, 255, 255])),
        "red" => Some(Rgb([255, 0, 0])),
        "green" => Some(Rgb([0, 128, 0])),
        "blue" => Some(Rgb([0, 0, 255])),
        "navy" => Some(Rgb([0, 0, 128])),
        "gray" | "grey" => Some(Rgb([128, 128, 128])),
        "silver" => Some(Rgb([192, 192, 192])),
        "lightgray" | "lightgrey" => Some(Rgb([211, 211, 211])),
        _ => None,
    }
}

/// Greedy word wrap on a fixed character grid.
pub fn wrap_text(text: &str, chars_per_line: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut cur = String::new();
    for word in text.split_whitespace() {
        if cur.len() + word.len() + 1 > chars_per_line && !cur.is_empty() {
            lines.push(std::mem::take(&mut cur));
            cur.push_str(word);
        } else {
            if !cur.is_empty() {
                cur.push(' ');
            }
            cur.push_str(word);
        }
    }
    if !cur.is_empty() {
        lines.push(cur);
    }
    lines
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Flow<'a> {
    width: u32,
    y: u32,
    nodes: Vec<LayoutNode>,
    images: &'a ImageSet,
}

/// Lay out the subtree under `root` for a region `width` CSS pixels wide.
pub fn layout_region(root: ElementRef<'_>, width: u32, images: &ImageSet) -> Vec<LayoutNode> {
    let style = InlineStyle::of(root);
    let mut flow = Flow {
        width,
        y: EDGE,
        nodes: Vec::new(),
        images,
    };
    flow.container(root, EDGE, style.color.unwrap_or(BLACK));

    if let Some(bg) = style.background {
        let height = content_height(&flow.nodes);
        if height > 0 {
            let mut fill = LayoutNode::new(
                ElementType::Background,
                Rect { x: 0, y: 0, width, height },
                BoxModel { margin: 0, border: 0, padding: 0 },
            );
            fill.background = Some(bg);
            flow.nodes.insert(0, fill);
        }
    }
    flow.nodes
}

/// Height of the laid-out content including the bottom edge, 0 when empty.
pub fn content_height(nodes: &[LayoutNode]) -> u32 {
    nodes
        .iter()
        .map(LayoutNode::bottom)
        .max()
        .map_or(0, |bottom| bottom.saturating_add(EDGE))
}

impl Flow<'_> {
    fn box_width(&self, x: u32) -> u32 {
        self.width.saturating_sub(x.saturating_add(EDGE))
    }

    fn top(&self) -> i32 {
        offset(self.y)
    }

    fn advance(&mut self, height: u32) {
        self.y = self.y.saturating_add(height);
    }

    fn container(&mut self, el: ElementRef<'_>, x: u32, color: Rgb<u8>) {
        let mut pending = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(text) => pending.push_str(text),
                Node::Element(elem) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if INLINE.contains(&elem.name()) {
                        if !is_hidden(child_el) {
                            pending.push(' ');
                            pending.extend(child_el.text());
                            pending.push(' ');
                        }
                        continue;
                    }
                    self.flush_text(&mut pending, x, color);
                    self.block(child_el, x, color);
                }
                _ => {}
            }
        }
        self.flush_text(&mut pending, x, color);
    }

    fn flush_text(&mut self, pending: &mut String, x: u32, color: Rgb<u8>) {
        let text = collapse_whitespace(pending);
        pending.clear();
        self.text_block(ElementType::Text, &text, x, 1, color, None, 2, 4);
    }

    fn block(&mut self, el: ElementRef<'_>, x: u32, inherited: Rgb<u8>) {
        let tag = el.value().name();
        if SKIPPED.contains(&tag) {
            return;
        }
        let style = InlineStyle::of(el);
        if style.hidden {
            return;
        }
        let color = style.color.unwrap_or(inherited);
        let text = || collapse_whitespace(&el.text().collect::<String>());

        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = tag[1..].parse::<u8>().unwrap_or(6);
                let scale = if level <= 2 { 2 } else { 1 };
                self.text_block(
                    ElementType::Heading(level),
                    &text(),
                    x,
                    scale,
                    color,
                    style.background,
                    8,
                    8,
                );
            }
            "p" => self.text_block(ElementType::Paragraph, &text(), x, 1, color, style.background, 6, 6),
            "li" => {
                let item = format!("\u{2022} {}", text());
                self.text_block(ElementType::ListItem, &item, x, 1, color, style.background, 2, 2);
            }
            "img" => self.image(el, x),
            "hr" => self.rule(x),
            "tr" => self.table_row(el, x, color),
            "ul" | "ol" => self.with_background(style.background, x, |flow| {
                flow.container(el, x + LIST_INDENT, color)
            }),
            _ => self.with_background(style.background, x, |flow| flow.container(el, x, color)),
        }
    }

    fn with_background(&mut self, bg: Option<Rgb<u8>>, x: u32, f: impl FnOnce(&mut Self)) {
        let idx = self.nodes.len();
        let top = self.y;
        f(self);
        if let Some(bg) = bg {
            if self.y > top {
                let mut fill = LayoutNode::new(
                    ElementType::Background,
                    Rect {
                        x: offset(x),
                        y: offset(top),
                        width: self.box_width(x),
                        height: self.y - top,
                    },
                    BoxModel { margin: 0, border: 0, padding: 0 },
                );
                fill.background = Some(bg);
                self.nodes.insert(idx, fill);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn text_block(
        &mut self,
        kind: ElementType,
        text: &str,
        x: u32,
        scale: u32,
        color: Rgb<u8>,
        background: Option<Rgb<u8>>,
        padding: u32,
        margin: u32,
    ) {
        if text.trim().is_empty() {
            return;
        }
        let box_w = self.box_width(x);
        let content_w = box_w.saturating_sub(padding * 2);
        let chars_per_line = (content_w / (GLYPH_WIDTH * scale)).max(1) as usize;
        let lines = wrap_text(text, chars_per_line);
        let lines_count = (lines.len() as u32).max(1);
        let box_h = lines_count
            .saturating_mul(LINE_HEIGHT * scale)
            .saturating_add(padding * 2);

        let mut node = LayoutNode::new(
            kind,
            Rect {
                x: offset(x),
                y: self.top(),
                width: box_w,
                height: box_h,
            },
            BoxModel { margin, border: 0, padding },
        );
        node.text = lines.join("\n");
        node.scale = scale;
        node.color = color;
        node.background = background;
        self.nodes.push(node);
        self.advance(box_h.saturating_add(margin));
    }

    fn image(&mut self, el: ElementRef<'_>, x: u32) {
        let Some(src) = el.value().attr("src") else {
            return;
        };
        let attr = |name: &str| {
            el.value()
                .attr(name)
                .and_then(|v| v.trim().trim_end_matches("px").parse::<u32>().ok())
        };
        let (mut w, mut h) = match (attr("width"), attr("height"), self.images.dimensions(src)) {
            (Some(w), Some(h), _) => (w, h),
            (Some(w), None, Some((iw, ih))) if iw > 0 => (w, proportional(ih, w, iw)),
            (None, Some(h), Some((iw, ih))) if ih > 0 => (proportional(iw, h, ih), h),
            (None, None, Some(dims)) => dims,
            (w, h, _) => (w.unwrap_or(IMAGE_PLACEHOLDER), h.unwrap_or(IMAGE_PLACEHOLDER)),
        };
        let max_w = self.box_width(x);
        if w > max_w && w > 0 {
            h = proportional(h, max_w, w);
            w = max_w;
        }
        if w == 0 || h == 0 {
            return;
        }

        let mut node = LayoutNode::new(
            ElementType::Image,
            Rect {
                x: offset(x),
                y: self.top(),
                width: w,
                height: h,
            },
            BoxModel { margin: 6, border: 0, padding: 0 },
        );
        node.image_src = Some(src.to_string());
        self.nodes.push(node);
        self.advance(h.saturating_add(6));
    }

    fn rule(&mut self, x: u32) {
        let node = LayoutNode::new(
            ElementType::Rule,
            Rect {
                x: offset(x),
                y: offset(self.y.saturating_add(4)),
                width: self.box_width(x),
                height: 1,
            },
            BoxModel { margin: 4, border: 0, padding: 0 },
        );
        self.nodes.push(node);
        self.advance(9);
    }

    fn table_row(&mut self, el: ElementRef<'_>, x: u32, color: Rgb<u8>) {
        let cells: Vec<ElementRef<'_>> = el
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| matches!(c.value().name(), "td" | "th") && !is_hidden(*c))
            .collect();
        if cells.is_empty() {
            return;
        }
        let padding = 4u32;
        let cell_w = (self.box_width(x) / cells.len() as u32).max(1);
        let chars_per_line = (cell_w.saturating_sub(padding * 2) / GLYPH_WIDTH).max(1) as usize;
        let wrapped: Vec<Vec<String>> = cells
            .iter()
            .map(|c| wrap_text(&collapse_whitespace(&c.text().collect::<String>()), chars_per_line))
            .collect();
        let max_lines = wrapped.iter().map(Vec::len).max().unwrap_or(0).max(1) as u32;
        let row_h = max_lines.saturating_mul(LINE_HEIGHT).saturating_add(padding * 2);

        for (i, (cell, lines)) in cells.iter().zip(wrapped).enumerate() {
            let style = InlineStyle::of(*cell);
            let mut node = LayoutNode::new(
                ElementType::TableCell,
                Rect {
                    x: offset(x.saturating_add((i as u32).saturating_mul(cell_w))),
                    y: self.top(),
                    width: cell_w,
                    height: row_h,
                },
                BoxModel { margin: 0, border: 1, padding },
            );
            node.text = lines.join("\n");
            node.color = style.color.unwrap_or(color);
            node.background = style.background;
            self.nodes.push(node);
        }
        self.advance(row_h);
    }
}

/// Clamp a flow offset into the `i32` coordinate space of a [`Rect`].
fn offset(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

fn proportional(value: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = value as u64 * numerator as u64 / denominator.max(1) as u64;
    u32::try_from(scaled).unwrap_or(u32::MAX)
}
