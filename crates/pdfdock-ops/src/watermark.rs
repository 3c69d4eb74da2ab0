use crate::{pdf, raster};
use async_trait::async_trait;
use lopdf::content::{Content, Operation as Op};
use lopdf::{dictionary, Document, Object, ObjectId, StringFormat};
use pdfdock_jobs::{Job, Operation, Processor, TaskFailure};
use serde::Deserialize;
use std::f64::consts::FRAC_1_SQRT_2;
use std::path::PathBuf;

const FONT_RESOURCE: &str = "PdfdockWmFont";
const IMAGE_RESOURCE: &str = "PdfdockWmImage";
const STATE_RESOURCE: &str = "PdfdockWmState";

/// Fill gray of text marks.
const TEXT_GRAY: f64 = 0.6;

const MAX_FONT_SIZE: f64 = 500.0;
const MAX_TEXT_CHARS: usize = 200;

/// Upper bound on marks painted on one page when tiling.
const MAX_TILES: usize = 400;

/// Advance widths of Helvetica for ASCII 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Diagonal,
    Center,
    Tile,
    /// Image marks only: cover the whole page.
    Stretch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontFamily {
    Helvetica,
    Times,
    Courier,
}

impl FontFamily {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        [Self::Helvetica, Self::Times, Self::Courier]
            .into_iter()
            .find(|family| family.name().eq_ignore_ascii_case(raw))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Helvetica => "Helvetica",
            Self::Times => "Times",
            Self::Courier => "Courier",
        }
    }

    /// Standard 14 font name for the given variant.
    pub fn base_font(&self, bold: bool, italic: bool) -> &'static str {
        match (self, bold, italic) {
            (Self::Helvetica, false, false) => "Helvetica",
            (Self::Helvetica, true, false) => "Helvetica-Bold",
            (Self::Helvetica, false, true) => "Helvetica-Oblique",
            (Self::Helvetica, true, true) => "Helvetica-BoldOblique",
            (Self::Times, false, false) => "Times-Roman",
            (Self::Times, true, false) => "Times-Bold",
            (Self::Times, false, true) => "Times-Italic",
            (Self::Times, true, true) => "Times-BoldItalic",
            (Self::Courier, false, false) => "Courier",
            (Self::Courier, true, false) => "Courier-Bold",
            (Self::Courier, false, true) => "Courier-Oblique",
            (Self::Courier, true, true) => "Courier-BoldOblique",
        }
    }

    /// Approximate advance width of WinAnsi `text` at `size` points.
    /// Proportional faces are measured with Helvetica metrics and scaled.
    pub fn text_width(&self, text: &[u8], size: f64, bold: bool) -> f64 {
        let units: f64 = match self {
            Self::Courier => 600.0 * text.len() as f64,
            _ => {
                let helvetica: f64 = text
                    .iter()
                    .map(|&b| match b {
                        32..=126 => f64::from(HELVETICA_WIDTHS[usize::from(b - 32)]),
                        _ => 556.0,
                    })
                    .sum();
                let face = if *self == Self::Times { 0.9 } else { 1.0 };
                let weight = if bold { 1.05 } else { 1.0 };
                helvetica * face * weight
            }
        };
        units * size / 1000.0
    }
}

#[derive(Debug, Deserialize)]
pub struct WatermarkOptions {
    /// Defaults to `image` when an image was uploaded, else `text`
    #[serde(default)]
    pub mode: Option<Mode>,

    #[serde(default = "default_text")]
    pub text: String,

    #[serde(default = "default_font")]
    pub font: String,

    #[serde(default = "default_size", deserialize_with = "pdf::lenient")]
    pub size: f64,

    #[serde(default)]
    pub style: Style,

    #[serde(default, deserialize_with = "pdf::lenient")]
    pub bold: bool,

    #[serde(default, deserialize_with = "pdf::lenient")]
    pub italic: bool,

    #[serde(default, deserialize_with = "pdf::lenient")]
    pub underline: bool,

    /// Defaults to 1 for text and 0.2 for images; clamped to 0.05..=1
    #[serde(default, deserialize_with = "lenient_opt")]
    pub opacity: Option<f64>,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            mode: None,
            text: default_text(),
            font: default_font(),
            size: default_size(),
            style: Style::default(),
            bold: false,
            italic: false,
            underline: false,
            opacity: None,
        }
    }
}

fn default_text() -> String {
    "CONFIDENTIAL".to_string()
}

fn default_font() -> String {
    FontFamily::Helvetica.name().to_string()
}

fn default_size() -> f64 {
    48.0
}

fn lenient_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    pdf::lenient(deserializer).map(Some)
}

/// A validated text mark.
#[derive(Debug, Clone)]
struct TextMark {
    text: Vec<u8>,
    base_font: &'static str,
    size: f64,
    width: f64,
    underline: bool,
}

#[derive(Debug, Clone)]
enum Mark {
    Text(TextMark),
    Image(PathBuf),
}

#[derive(Debug, Clone)]
struct Plan {
    mark: Mark,
    style: Style,
    opacity: f64,
}

impl Plan {
    fn new(options: WatermarkOptions, image: Option<PathBuf>) -> Result<Self, TaskFailure> {
        let mode = options
            .mode
            .unwrap_or(if image.is_some() { Mode::Image } else { Mode::Text });

        let (mark, default_opacity) = match mode {
            Mode::Image => {
                let image = image.ok_or_else(|| {
                    TaskFailure::validation("an image watermark needs an uploaded image")
                })?;
                (Mark::Image(image), 0.2)
            }
            Mode::Text => {
                if options.style == Style::Stretch {
                    return Err(TaskFailure::validation(
                        "the stretch style applies to image watermarks only",
                    ));
                }
                (Mark::Text(text_mark(&options)?), 1.0)
            }
        };

        let opacity = options.opacity.unwrap_or(default_opacity);
        if !opacity.is_finite() {
            return Err(TaskFailure::validation("opacity must be a number"));
        }
        Ok(Self {
            mark,
            style: options.style,
            opacity: opacity.clamp(0.05, 1.0),
        })
    }
}

fn text_mark(options: &WatermarkOptions) -> Result<TextMark, TaskFailure> {
    let family = FontFamily::parse(&options.font).ok_or_else(|| {
        TaskFailure::validation(format!(
            "unknown font {:?}, expected Helvetica, Times or Courier",
            options.font
        ))
    })?;
    if !(options.size > 0.0 && options.size <= MAX_FONT_SIZE) {
        return Err(TaskFailure::validation(format!(
            "font size must be between 0 and {}",
            MAX_FONT_SIZE
        )));
    }

    let trimmed = options.text.trim();
    let text = if trimmed.is_empty() { default_text() } else { trimmed.to_string() };
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(TaskFailure::validation(format!(
            "watermark text is limited to {} characters",
            MAX_TEXT_CHARS
        )));
    }

    let text = win_ansi(&text);
    Ok(TextMark {
        width: family.text_width(&text, options.size, options.bold),
        base_font: family.base_font(options.bold, options.italic),
        size: options.size,
        underline: options.underline,
        text,
    })
}

/// Encode for a WinAnsi font. Characters outside Latin-1 become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match u32::from(c) {
            code @ (0x20..=0x7E | 0xA0..=0xFF) => code as u8,
            _ => b'?',
        })
        .collect()
}

/// Stamp a text or image mark on every page of the uploaded PDF.
#[derive(Debug, Clone, Default)]
pub struct Watermark;

#[async_trait]
impl Processor for Watermark {
    const OPERATION: Operation = Operation::Watermark;
    type Options = WatermarkOptions;

    async fn process(
        &self,
        job: &Job,
        options: WatermarkOptions,
        inputs: &[PathBuf],
    ) -> Result<Vec<PathBuf>, TaskFailure> {
        let (pdfs, others) = pdf::partition_pdfs(inputs);
        let [source] = pdfs.as_slice() else {
            return Err(TaskFailure::validation("watermark needs exactly one PDF"));
        };
        if let Some(other) = others.iter().find(|p| !raster::is_image(p)) {
            return Err(TaskFailure::validation(format!(
                "{} is neither a PDF nor an image",
                pdf::display_name(other)
            )));
        }

        let plan = Plan::new(options, others.into_iter().next())?;
        if matches!(plan.mark, Mark::Text(_)) && inputs.len() > 1 {
            tracing::debug!(job_id = %job.id, "text watermark ignores the uploaded image");
        }

        let source = source.clone();
        let out = pdf::output_path(job, "watermark");
        let target = out.clone();
        pdf::blocking(move || {
            let mut doc = pdf::load(&source)?;
            stamp(&mut doc, &plan)?;
            pdf::save(&mut doc, &target)
        })
        .await?;
        Ok(vec![out])
    }
}

fn stamp(doc: &mut Document, plan: &Plan) -> Result<(), TaskFailure> {
    pdf::materialize_inherited(doc);

    let (resource, object, image_size) = match &plan.mark {
        Mark::Text(text) => {
            let font = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => text.base_font,
                "Encoding" => "WinAnsiEncoding",
            });
            (("Font", FONT_RESOURCE), font, None)
        }
        Mark::Image(path) => {
            let image = raster::embed(doc, path)?;
            (("XObject", IMAGE_RESOURCE), image.id, Some(image.size()))
        }
    };
    let state = (plan.opacity < 1.0).then(|| {
        doc.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => plan.opacity,
            "CA" => plan.opacity,
        })
    });

    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for page_id in pages {
        let bounds = pdf::page_box(doc, page_id);
        let mut ops = vec![Op::new("q", vec![])];
        if state.is_some() {
            ops.push(Op::new("gs", vec![name(STATE_RESOURCE)]));
        }
        match (&plan.mark, image_size) {
            (Mark::Text(text), _) => text_ops(&mut ops, text, plan.style, bounds),
            (Mark::Image(_), Some(size)) => image_ops(&mut ops, size, plan.style, bounds),
            (Mark::Image(_), None) => {}
        }
        ops.push(Op::new("Q", vec![]));

        let content = Content { operations: ops }
            .encode()
            .map_err(|e| TaskFailure::execution(format!("cannot encode watermark: {}", e)))?;

        pdf::add_page_resource(doc, page_id, resource.0, resource.1, object.into())?;
        if let Some(state) = state {
            pdf::add_page_resource(doc, page_id, "ExtGState", STATE_RESOURCE, state.into())?;
        }
        pdf::overlay_content(doc, page_id, content)?;
    }

    doc.compress();
    Ok(())
}

fn name(value: &str) -> Object {
    Object::Name(value.as_bytes().to_vec())
}

fn matrix(values: [f64; 6]) -> Vec<Object> {
    values.into_iter().map(Object::from).collect()
}

/// Origins of a grid of marks covering `bounds`, bottom row first.
fn tiles(bounds: [f64; 4], first: (f64, f64), step: (f64, f64)) -> Vec<(f64, f64)> {
    let [_, _, x1, y1] = bounds;
    let mut origins = Vec::new();
    let mut y = first.1;
    while y < y1 {
        let mut x = first.0;
        while x < x1 {
            if origins.len() == MAX_TILES {
                return origins;
            }
            origins.push((x, y));
            x += step.0;
        }
        y += step.1;
    }
    origins
}

fn text_ops(ops: &mut Vec<Op>, mark: &TextMark, style: Style, bounds: [f64; 4]) {
    let [x0, y0, x1, y1] = bounds;
    let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);
    // Raise the baseline so the mark's body sits on the center line.
    let rise = mark.size * 0.35;

    let placements: Vec<[f64; 6]> = match style {
        Style::Diagonal => {
            let (c, s) = (FRAC_1_SQRT_2, FRAC_1_SQRT_2);
            let half = mark.width / 2.0;
            vec![[c, s, -s, c, cx - half * c + rise * s, cy - half * s - rise * c]]
        }
        Style::Tile => tiles(
            bounds,
            (x0 + mark.size, y0 + mark.size),
            (mark.width + 2.0 * mark.size, 2.5 * mark.size),
        )
        .into_iter()
        .map(|(x, y)| [1.0, 0.0, 0.0, 1.0, x, y])
        .collect(),
        Style::Center | Style::Stretch => {
            vec![[1.0, 0.0, 0.0, 1.0, cx - mark.width / 2.0, cy - rise]]
        }
    };

    ops.push(Op::new("g", vec![TEXT_GRAY.into()]));
    ops.push(Op::new("BT", vec![]));
    ops.push(Op::new("Tf", vec![name(FONT_RESOURCE), mark.size.into()]));
    for placement in &placements {
        ops.push(Op::new("Tm", matrix(*placement)));
        ops.push(Op::new(
            "Tj",
            vec![Object::String(mark.text.clone(), StringFormat::Literal)],
        ));
    }
    ops.push(Op::new("ET", vec![]));

    if mark.underline {
        let below = -mark.size * 0.12;
        ops.push(Op::new("G", vec![TEXT_GRAY.into()]));
        ops.push(Op::new("w", vec![(mark.size / 16.0).max(0.5).into()]));
        for placement in placements {
            ops.push(Op::new("q", vec![]));
            ops.push(Op::new("cm", matrix(placement)));
            ops.push(Op::new("m", vec![0.into(), below.into()]));
            ops.push(Op::new("l", vec![mark.width.into(), below.into()]));
            ops.push(Op::new("S", vec![]));
            ops.push(Op::new("Q", vec![]));
        }
    }
}

fn image_ops(ops: &mut Vec<Op>, (iw, ih): (f64, f64), style: Style, bounds: [f64; 4]) {
    let [x0, y0, x1, y1] = bounds;
    let (bw, bh) = (x1 - x0, y1 - y0);
    let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);
    let fitted = || {
        let scale = (bw * 0.5 / iw).min(bh * 0.6 / ih);
        (iw * scale, ih * scale)
    };
    let mut draw = |m: [f64; 6]| {
        ops.push(Op::new("q", vec![]));
        ops.push(Op::new("cm", matrix(m)));
        ops.push(Op::new("Do", vec![name(IMAGE_RESOURCE)]));
        ops.push(Op::new("Q", vec![]));
    };

    match style {
        Style::Stretch => draw([bw, 0.0, 0.0, bh, x0, y0]),
        Style::Center => {
            let (w, h) = fitted();
            draw([w, 0.0, 0.0, h, cx - w / 2.0, cy - h / 2.0]);
        }
        Style::Diagonal => {
            let (w, h) = fitted();
            let (c, s) = (FRAC_1_SQRT_2, FRAC_1_SQRT_2);
            // Rotate the centered image 45 degrees about the page center.
            draw([
                w * c,
                w * s,
                -h * s,
                h * c,
                cx - (w * c - h * s) / 2.0,
                cy - (w * s + h * c) / 2.0,
            ]);
        }
        Style::Tile => {
            let w = bw / 3.0;
            let h = w * ih / iw;
            for (x, y) in tiles(bounds, (x0, y0), (w + 10.0, h + 10.0)) {
                draw([w, 0.0, 0.0, h, x, y]);
            }
        }
    }
}
