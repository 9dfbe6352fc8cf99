//! The interactive command grammar
//!
//! One line is a sequence of `--key value...` groups, e.g.
//! `--action resize --width 800 --height 600 --scale px`. Values may be
//! quoted. A key with no value is a flag. Several values for one key are
//! joined with single spaces, so unquoted paths with spaces survive.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::color::parse_color;
use crate::error::CommandError;
use crate::transform::{
    BorderMode, Denoise, DocumentFormat, DocumentParams, EditBorder, Export, GridSlice, Resize,
    ScaleUnit, ToAvif, ToJpeg,
};

/// Split a line into words, honouring single quotes, double quotes and
/// backslash escapes
pub fn tokenize(line: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(CommandError::UnterminatedQuote),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch) => current.push(ch),
                            None => return Err(CommandError::UnterminatedQuote),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(CommandError::UnterminatedQuote),
                    }
                }
            }
            '\\' => {
                in_token = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// `--key value...` groups of one line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgMap {
    values: HashMap<String, Vec<String>>,
}

impl ArgMap {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        let mut key: Option<String> = None;

        for token in tokenize(line)? {
            match token.strip_prefix("--") {
                Some(name) if !name.is_empty() => {
                    values.entry(name.to_string()).or_default();
                    key = Some(name.to_string());
                }
                _ => match &key {
                    Some(key) => values.entry(key.clone()).or_default().push(token),
                    None => return Err(CommandError::DanglingValue(token)),
                },
            }
        }

        Ok(Self { values })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values of `key`, joined with spaces. None if absent or valueless.
    pub fn text(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .filter(|values| !values.is_empty())
            .map(|values| values.join(" "))
    }

    /// True when present with no value or with a truthy one
    pub fn flag(&self, key: &str) -> bool {
        match self.values.get(key) {
            None => false,
            Some(values) if values.is_empty() => true,
            Some(values) => !matches!(
                values[0].to_ascii_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            ),
        }
    }

    pub fn number<T: FromStr>(&self, key: &str) -> Result<Option<T>, CommandError> {
        self.text(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| CommandError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                })
            })
            .transpose()
    }

    fn path(&self, key: &'static str) -> Result<PathBuf, CommandError> {
        self.text(key)
            .map(PathBuf::from)
            .ok_or(CommandError::MissingOption(key))
    }

    fn color(&self, key: &str) -> Result<Option<image::Rgba<u8>>, CommandError> {
        self.text(key)
            .map(|raw| {
                parse_color(&raw).map_err(|_| CommandError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                })
            })
            .transpose()
    }
}

/// What the user asked for, with its parameters resolved
#[derive(Debug, Clone)]
pub enum Action {
    Resize(Resize),
    EditBorder(EditBorder),
    ToJpeg(ToJpeg),
    ToAvif(ToAvif),
    Denoise(Denoise),
    GridSlice(GridSlice),
    SaveImages(Export),
    ToDocument(DocumentFormat, DocumentParams),
    /// Step the working batch back to its parents
    Revert,
    /// Show the working batch
    Status,
    /// Show the derivation chain of every record in the batch
    History,
}

/// One parsed input line
#[derive(Debug)]
pub struct Command {
    /// None when the line has no `--action`
    pub action: Option<Result<Action, CommandError>>,
    pub clear_all: bool,
    pub exit: bool,
}

impl Command {
    /// Parse a line. `dpi` is the default for unit conversions and documents.
    ///
    /// A bad action does not hide `--clear_all` or `--exit` on the same line.
    pub fn parse(line: &str, dpi: u32) -> Result<Self, CommandError> {
        let args = ArgMap::parse(line)?;
        let action = args.text("action").map(|name| parse_action(&name, &args, dpi));
        Ok(Self {
            action,
            clear_all: args.flag("clear_all"),
            exit: args.flag("exit"),
        })
    }
}

fn scale(args: &ArgMap) -> ScaleUnit {
    args.text("scale")
        .map(|unit| ScaleUnit::parse_lenient(&unit))
        .unwrap_or_default()
}

fn parse_action(name: &str, args: &ArgMap, dpi: u32) -> Result<Action, CommandError> {
    let dpi = args.number("dpi")?.unwrap_or(dpi);

    let action = match name {
        "resize" => Action::Resize(Resize {
            width: args.number("width")?,
            height: args.number("height")?,
            dpi,
            scale: scale(args),
        }),
        "crop" => {
            let mut edit = EditBorder {
                left: args.number("left")?.unwrap_or(0.0),
                right: args.number("right")?.unwrap_or(0.0),
                top: args.number("top")?.unwrap_or(0.0),
                bottom: args.number("bottom")?.unwrap_or(0.0),
                scale: scale(args),
                dpi,
                ..Default::default()
            };
            if let Some(mode) = args.text("type") {
                edit.mode = mode.parse::<BorderMode>().map_err(|_| CommandError::InvalidValue {
                    key: "type".to_string(),
                    value: mode,
                })?;
            }
            if let Some(color) = args.color("color")? {
                edit.color = color;
            }
            if let Some(threshold) = args.number("threshold")? {
                edit.threshold = threshold;
            }
            Action::EditBorder(edit)
        }
        "to_jpeg" => {
            let mut jpeg = ToJpeg {
                dpi,
                ..Default::default()
            };
            if let Some(quality) = args.number("quality")? {
                jpeg.quality = quality;
            }
            if let Some(color) = args.color("background_color")? {
                jpeg.background = color;
            }
            Action::ToJpeg(jpeg)
        }
        "to_avif" => {
            let mut avif = ToAvif {
                no_alpha: args.flag("no_alpha"),
                ..Default::default()
            };
            if let Some(quality) = args.number("quality")? {
                avif.quality = quality;
            }
            if let Some(speed) = args.number("speed")? {
                avif.speed = speed;
            }
            if let Some(color) = args.color("color")? {
                avif.background = color;
            }
            if let Some(subsampling) = args.number("subsampling")? {
                avif.subsampling = subsampling;
            }
            Action::ToAvif(avif)
        }
        "remove_noise" => Action::Denoise(Denoise {
            radius: args.number("radius")?.unwrap_or(1),
        }),
        "from_grid" => Action::GridSlice(GridSlice {
            rows: args.number("rows")?.unwrap_or(1),
            cols: args.number("cols")?.unwrap_or(1),
        }),
        "save_images" => {
            let mut export = Export::to(args.path("output_directory_path")?);
            export.with_id = args.flag("with_id");
            export.prefix = args.text("prefix").unwrap_or_default();
            // Both spellings are accepted
            export.suffix = args
                .text("suffix")
                .or_else(|| args.text("sufix"))
                .unwrap_or_default();
            Action::SaveImages(export)
        }
        "to_pdf" | "to_word" => {
            let format = if name == "to_pdf" {
                DocumentFormat::Pdf
            } else {
                DocumentFormat::Word
            };
            let mut params = DocumentParams::new(args.path("output_directory_path")?);
            params.dpi = dpi;
            if let Some(file_name) = args.text("file_name") {
                params.file_name = file_name;
            }
            Action::ToDocument(format, params)
        }
        "revert" => Action::Revert,
        "status" => Action::Status,
        "history" => Action::History,
        other => return Err(CommandError::UnknownAction(other.to_string())),
    };

    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_quotes() {
        let tokens = tokenize(r#"--out "/tmp/my dir" --name 'a b' plain\ word"#).unwrap();
        assert_eq!(tokens, vec!["--out", "/tmp/my dir", "--name", "a b", "plain word"]);
        assert_eq!(tokenize("--x \"open"), Err(CommandError::UnterminatedQuote));
    }

    #[test]
    fn test_arg_map_flags_and_values() {
        let args = ArgMap::parse("--exit --with_id false --prefix x y").unwrap();
        assert!(args.flag("exit"));
        assert!(!args.flag("with_id"));
        assert_eq!(args.text("prefix").as_deref(), Some("x y"));
        assert!(!args.contains("clear_all"));
    }

    #[test]
    fn test_value_before_any_key_is_rejected() {
        assert_eq!(
            ArgMap::parse("resize --width 10"),
            Err(CommandError::DanglingValue("resize".to_string()))
        );
    }

    #[test]
    fn test_parse_resize() {
        let command = Command::parse("--action resize --width 800 --height 600 --scale px", 300).unwrap();
        match command.action {
            Some(Ok(Action::Resize(resize))) => {
                assert_eq!(resize.width, Some(800.0));
                assert_eq!(resize.height, Some(600.0));
                assert_eq!(resize.scale, ScaleUnit::Px);
                assert_eq!(resize.dpi, 300);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_keeps_exit() {
        let command = Command::parse("--action sharpen --exit", 300).unwrap();
        assert!(command.exit);
        assert!(matches!(
            command.action,
            Some(Err(CommandError::UnknownAction(ref name))) if name == "sharpen"
        ));
    }

    #[test]
    fn test_save_images_requires_output() {
        let command = Command::parse("--action save_images --prefix p", 300).unwrap();
        assert!(matches!(
            command.action,
            Some(Err(CommandError::MissingOption("output_directory_path")))
        ));

        let command = Command::parse(
            "--action save_images --output_directory_path /out --sufix _v2 --with_id",
            300,
        )
        .unwrap();
        match command.action {
            Some(Ok(Action::SaveImages(export))) => {
                assert_eq!(export.output_dir, PathBuf::from("/out"));
                assert_eq!(export.suffix, "_v2");
                assert!(export.with_id);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_crop_options() {
        let command = Command::parse(
            "--action crop --left 5 --right 5 --type pad --color #ff0000 --scale mm --dpi 150",
            300,
        )
        .unwrap();
        match command.action {
            Some(Ok(Action::EditBorder(edit))) => {
                assert_eq!(edit.mode, BorderMode::Pad);
                assert_eq!(edit.color, image::Rgba([255, 0, 0, 255]));
                assert_eq!(edit.scale, ScaleUnit::Mm);
                assert_eq!(edit.dpi, 150);
                assert_eq!(edit.top, 0.0);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_avif_subsampling_option() {
        let command = Command::parse("--action to_avif --quality 60 --subsampling 4:2:0", 300).unwrap();
        match command.action {
            Some(Ok(Action::ToAvif(avif))) => {
                assert_eq!(avif.quality, 60);
                assert_eq!(avif.subsampling, crate::transform::Subsampling::Yuv420);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let command = Command::parse("--action to_avif --subsampling sideways", 300).unwrap();
        assert!(matches!(
            command.action,
            Some(Err(CommandError::InvalidValue { ref key, .. })) if key == "subsampling"
        ));
    }

    #[test]
    fn test_bad_number_is_invalid_value() {
        let command = Command::parse("--action to_jpeg --quality high", 300).unwrap();
        assert!(matches!(
            command.action,
            Some(Err(CommandError::InvalidValue { ref key, .. })) if key == "quality"
        ));
    }

    #[test]
    fn test_document_defaults() {
        let command = Command::parse("--action to_pdf --output_directory_path out", 200).unwrap();
        match command.action {
            Some(Ok(Action::ToDocument(DocumentFormat::Pdf, params))) => {
                assert_eq!(params.file_name, "images");
                assert_eq!(params.dpi, 200);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
