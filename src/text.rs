//! Reader and writer for the text cascade format.
//!
//! A model file holds one cascade trained for one window size. All fields are
//! whitespace separated; line breaks carry no meaning to the parser.
//!
//! ```text
//! stage_count tile_w tile_h channels
//! margin_top margin_right margin_bottom margin_left
//! # per stage:
//! presence_mask weight_0 weight_1 reject_threshold
//! pair_count min_val                      # root feature
//! channel alpha x1 y1 x2 y2               # pair_count times
//! pair_count min_val ...                  # left node, if mask & 0x2
//! pair_count min_val ...                  # right node, if mask & 0x1
//! ```
//!
//! Approve thresholds and soft-cascade settings are not part of the format;
//! loaded stages use [`DEFAULT_APPROVE_THRESHOLD`].
//!
//! Any malformed field aborts the whole load. No partially parsed model is
//! ever returned.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::str::FromStr;

use bzip2::read::BzDecoder;

use crate::cascade::Cascade;
use crate::error::{Error, Result};
use crate::features::{PairFeature, SamplePair};
use crate::model::CascadeModel;
use crate::tree::{Branches, DecisionTree, DEFAULT_APPROVE_THRESHOLD};
use crate::types::{Margins, SamplePoint, WindowGeometry};

/// Whitespace tokenizer that remembers the current line for error reporting.
struct TokenReader<'a> {
    lines: std::str::Lines<'a>,
    current: std::str::SplitWhitespace<'a>,
    line: usize,
}

impl<'a> TokenReader<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            lines: content.lines(),
            current: "".split_whitespace(),
            line: 0,
        }
    }

    fn error(&self, field: &'static str, message: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line,
            field,
            message: message.into(),
        }
    }

    fn next_token(&mut self, field: &'static str) -> Result<&'a str> {
        loop {
            if let Some(token) = self.current.next() {
                return Ok(token);
            }
            match self.lines.next() {
                Some(line) => {
                    self.line += 1;
                    self.current = line.split_whitespace();
                }
                None => return Err(self.error(field, "unexpected end of file")),
            }
        }
    }

    fn read<T>(&mut self, field: &'static str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let token = self.next_token(field)?;
        token
            .parse()
            .map_err(|e| self.error(field, format!("cannot parse {:?}: {}", token, e)))
    }

    fn read_f32(&mut self, field: &'static str) -> Result<f32> {
        let value: f32 = self.read(field)?;
        if !value.is_finite() {
            return Err(self.error(field, format!("value {} is not finite", value)));
        }
        Ok(value)
    }

    /// Number of tokens left unread.
    fn remaining(mut self) -> usize {
        let mut count = self.current.by_ref().count();
        for line in self.lines {
            count += line.split_whitespace().count();
        }
        count
    }
}

/// Load a model from a text file, decompressing `*.bz2` files.
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<CascadeModel> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let is_bz2 = path.extension().is_some_and(|ext| ext == "bz2");

    let mut content = String::new();
    if is_bz2 {
        BzDecoder::new(reader).read_to_string(&mut content)?;
    } else {
        let mut reader = reader;
        reader.read_to_string(&mut content)?;
    }

    let model = parse_model(&content)?;
    tracing::debug!(
        "Loaded cascade {}: {} stages, {} channels, tile {}x{}",
        path.display(),
        model.num_stages(),
        model.channels(),
        model.geometry().tile_w(),
        model.geometry().tile_h()
    );
    Ok(model)
}

/// Load a model from an already-opened reader of uncompressed text.
pub fn load_model_from_reader<R: Read>(mut reader: R) -> Result<CascadeModel> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    parse_model(&content)
}

/// Parse a complete model from its text representation.
pub fn parse_model(content: &str) -> Result<CascadeModel> {
    let mut r = TokenReader::new(content);

    // 1. Header
    let count: usize = r.read("stage_count")?;
    let tile_w: i32 = r.read("tile_w")?;
    let tile_h: i32 = r.read("tile_h")?;
    let channels: usize = r.read("channels")?;

    // 2. Margins
    let top: i32 = r.read("margin_top")?;
    let right: i32 = r.read("margin_right")?;
    let bottom: i32 = r.read("margin_bottom")?;
    let left: i32 = r.read("margin_left")?;
    let geometry = WindowGeometry::new(tile_w, tile_h, Margins::new(top, right, bottom, left));

    // 3. Stages
    let mut stages = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        stages.push(parse_stage(&mut r)?);
    }

    let trailing = r.remaining();
    if trailing > 0 {
        tracing::debug!("Ignoring {} trailing token(s) after last stage", trailing);
    }

    let model = CascadeModel::new(Cascade::new(stages, channels), geometry);
    model.validate()?;
    Ok(model)
}

fn parse_stage(r: &mut TokenReader<'_>) -> Result<DecisionTree> {
    let mask: u32 = r.read("presence_mask")?;
    if mask > (Branches::LEFT_BIT | Branches::RIGHT_BIT) {
        return Err(r.error("presence_mask", format!("mask {} is not in 0..=3", mask)));
    }
    let weight_0 = r.read_f32("weight_0")?;
    let weight_1 = r.read_f32("weight_1")?;
    let reject = r.read_f32("reject_threshold")?;

    let root = parse_feature(r)?;
    let left = if mask & Branches::LEFT_BIT != 0 {
        Some(parse_feature(r)?)
    } else {
        None
    };
    let right = if mask & Branches::RIGHT_BIT != 0 {
        Some(parse_feature(r)?)
    } else {
        None
    };

    Ok(
        DecisionTree::new(root, Branches::from_parts(left, right), [weight_0, weight_1])
            .with_thresholds(reject, DEFAULT_APPROVE_THRESHOLD),
    )
}

fn parse_feature(r: &mut TokenReader<'_>) -> Result<PairFeature> {
    let count: usize = r.read("pair_count")?;
    let min_val = r.read_f32("min_val")?;

    let mut pairs = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        let channel: usize = r.read("channel")?;
        let alpha = r.read_f32("alpha")?;
        let x1: i32 = r.read("x1")?;
        let y1: i32 = r.read("y1")?;
        let x2: i32 = r.read("x2")?;
        let y2: i32 = r.read("y2")?;
        pairs.push(SamplePair {
            channel,
            alpha,
            p1: SamplePoint::new(x1, y1),
            p2: SamplePoint::new(x2, y2),
        });
    }

    Ok(PairFeature::new(pairs, min_val))
}

/// Write a model in the text format read by [`parse_model`].
pub fn write_model<W: Write>(model: &CascadeModel, w: &mut W) -> Result<()> {
    let g = model.geometry();
    let m = g.margins();
    writeln!(
        w,
        "{} {} {} {}",
        model.num_stages(),
        g.tile_w(),
        g.tile_h(),
        model.channels()
    )?;
    writeln!(w, "{} {} {} {}", m.top, m.right, m.bottom, m.left)?;

    for stage in model.cascade().stages() {
        writeln!(
            w,
            "{} {:e} {:e} {:e}",
            stage.branches.mask(),
            stage.weights[0],
            stage.weights[1],
            stage.reject_threshold
        )?;
        write_feature(&stage.root, w)?;
        if let Some(left) = stage.branches.left() {
            write_feature(left, w)?;
        }
        if let Some(right) = stage.branches.right() {
            write_feature(right, w)?;
        }
    }

    Ok(())
}

fn write_feature<W: Write>(feature: &PairFeature, w: &mut W) -> Result<()> {
    writeln!(w, "{} {:e}", feature.pairs.len(), feature.min_val)?;
    for pair in &feature.pairs {
        writeln!(
            w,
            "{} {:e} {} {} {} {}",
            pair.channel, pair.alpha, pair.p1.x, pair.p1.y, pair.p2.x, pair.p2.y
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const TWO_STAGES: &str = "\
2 16 32 1
4 2 4 2
0 -1.0e0 1.0e0 -3.0e0
1 5.0e-1
0 1.0 4 2 0 2
3 -2.5e-1 7.5e-1 -2.5
2 0.5
0 1 4 2 0 2
0 -0.5 1 1 2 2
1 0.5
0 1 0 2 4 2
1 1e-1
0 2 4 2 0 2
";

    #[test]
    fn parse_header_and_stages() {
        let model = parse_model(TWO_STAGES).unwrap();

        assert_eq!(model.num_stages(), 2);
        assert_eq!(model.channels(), 1);
        assert!(model.is_valid());
        assert!(model.is_resizable());

        let g = model.geometry();
        assert_eq!((g.tile_w(), g.tile_h()), (16, 32));
        assert_eq!(g.margins(), Margins::new(4, 2, 4, 2));
        assert_eq!((g.obj_w(), g.obj_h()), (12, 24));

        let stages = model.cascade().stages();
        assert_eq!(stages[0].branches, Branches::Leaf);
        assert_eq!(stages[0].approve_threshold, DEFAULT_APPROVE_THRESHOLD);
        assert_abs_diff_eq!(stages[0].reject_threshold, -3.0);

        let second = &stages[1];
        assert_eq!(second.branches.mask(), 3);
        assert_abs_diff_eq!(second.weights[0], -0.25);
        assert_abs_diff_eq!(second.weights[1], 0.75);
        assert_eq!(second.root.pairs.len(), 2);
        assert_abs_diff_eq!(second.root.pairs[1].alpha, -0.5);

        // Left node is read before the right node.
        let left = second.branches.left().unwrap();
        let right = second.branches.right().unwrap();
        assert_eq!(left.pairs[0].p1, SamplePoint::new(0, 2));
        assert_abs_diff_eq!(right.min_val, 0.1);
    }

    #[test]
    fn missing_stage_fails_whole_load() {
        let truncated = TWO_STAGES.replacen("2 16 32 1", "3 16 32 1", 1);
        let err = parse_model(&truncated).unwrap_err();
        match err {
            Error::Parse { field, message, .. } => {
                assert_eq!(field, "presence_mask");
                assert!(message.contains("end of file"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn bad_number_reports_line_and_field() {
        let broken = TWO_STAGES.replacen("0 1.0 4 2 0 2", "0 oops 4 2 0 2", 1);
        match parse_model(&broken).unwrap_err() {
            Error::Parse { line, field, .. } => {
                assert_eq!(line, 5);
                assert_eq!(field, "alpha");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn rejects_bad_mask_and_channel() {
        let bad_mask = TWO_STAGES.replacen("3 -2.5e-1", "4 -2.5e-1", 1);
        assert!(matches!(
            parse_model(&bad_mask),
            Err(Error::Parse { field: "presence_mask", .. })
        ));

        let bad_channel = TWO_STAGES.replacen("0 1.0 4 2 0 2", "1 1.0 4 2 0 2", 1);
        assert!(matches!(
            parse_model(&bad_channel),
            Err(Error::InvalidModel(_))
        ));
    }

    #[test]
    fn rejects_non_finite_weights() {
        let inf = TWO_STAGES.replacen("-1.0e0 1.0e0", "-inf 1.0e0", 1);
        assert!(matches!(
            parse_model(&inf),
            Err(Error::Parse { field: "weight_0", .. })
        ));
    }

    #[test]
    fn zero_stage_file_is_invalid() {
        assert!(matches!(
            parse_model("0 16 32 1\n4 2 4 2\n"),
            Err(Error::EmptyCascade)
        ));
    }

    #[test]
    fn trailing_tokens_are_ignored() {
        let padded = format!("{}\n0 0 0\n", TWO_STAGES);
        assert_eq!(parse_model(&padded).unwrap().num_stages(), 2);
    }

    #[test]
    fn write_then_parse_preserves_model() {
        let model = parse_model(TWO_STAGES).unwrap();

        let mut buf = Vec::new();
        write_model(&model, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("2 16 32 1\n4 2 4 2\n"));
        assert_eq!(parse_model(&text).unwrap(), model);
    }

    #[test]
    fn line_breaks_are_not_significant() {
        let flat = TWO_STAGES.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(parse_model(&flat).unwrap(), parse_model(TWO_STAGES).unwrap());
    }
}
