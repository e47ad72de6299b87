//! Typed operation parameters built from raw conversation answers.
//!
//! Answers are collected as free text keyed by [`ParamKey`]. Before the engine
//! is called they are converted into one [`OperationParams`] variant per
//! operation, so the engine never sees loosely-typed strings and a missing or
//! malformed answer is caught here as [`BotError::InputValidation`].

use crate::catalog::{Availability, OperationId, ParamKey};
use crate::error::BotError;
use crate::selector::{self, PageSet};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RotationAngle {
    #[serde(rename = "90")]
    Quarter,
    #[serde(rename = "180")]
    Half,
    #[serde(rename = "270")]
    ThreeQuarter,
}

impl RotationAngle {
    pub fn degrees(self) -> u16 {
        match self {
            RotationAngle::Quarter => 90,
            RotationAngle::Half => 180,
            RotationAngle::ThreeQuarter => 270,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpg => "jpg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberPosition {
    Top,
    Bottom,
}

/// Fully validated parameters for one engine call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum OperationParams {
    Merge,
    Split { pages: PageSet },
    ExtractPages { pages: PageSet },
    /// Pages to keep after removal.
    RemovePages { keep: PageSet },
    Rotate { pages: PageSet, angle: RotationAngle },
    Compress { level: CompressionLevel },
    PdfToWord,
    WordToPdf,
    PdfToImages { format: ImageFormat },
    ImagesToPdf,
    PowerPointToPdf,
    ExcelToPdf,
    HtmlToPdf,
    PdfToText,
    Ocr { language: String },
    Watermark { text: String },
    PageNumbers { position: NumberPosition },
    Protect { password: String },
    Unlock { password: String },
    Compare,
    Sign,
    ReversePages,
    Grayscale,
    EditMetadata { title: String, author: String },
    Repair,
}

impl OperationParams {
    /// Build parameters for `operation` from the collected answers.
    ///
    /// `page_count` is the primary input's page total; it is required by the
    /// page-scoped operations and ignored by the rest.
    pub fn from_answers(
        operation: OperationId,
        answers: &BTreeMap<ParamKey, String>,
        page_count: Option<usize>,
    ) -> Result<Self, BotError> {
        if operation.spec().availability != Availability::Interactive {
            return Err(BotError::validation(format!(
                "{} needs manual coordinate input, which is not supported here.",
                operation.spec().title
            )));
        }

        let answer = |key: ParamKey| {
            answers
                .get(&key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    BotError::validation(format!("Missing answer for '{key}'. Select the operation again."))
                })
        };
        let pages = || -> Result<PageSet, BotError> {
            let total = page_count.ok_or_else(|| {
                BotError::validation("Could not determine the page count of the document.")
            })?;
            Ok(selector::resolve(answer(ParamKey::Pages)?, total)?)
        };

        let params = match operation {
            OperationId::Merge => OperationParams::Merge,
            OperationId::Split => OperationParams::Split { pages: pages()? },
            OperationId::ExtractPages => OperationParams::ExtractPages { pages: pages()? },
            OperationId::RemovePages => {
                let total = page_count.ok_or_else(|| {
                    BotError::validation("Could not determine the page count of the document.")
                })?;
                OperationParams::RemovePages {
                    keep: selector::remove_pages(answer(ParamKey::Pages)?, total)?,
                }
            }
            OperationId::Rotate => OperationParams::Rotate {
                pages: pages()?,
                angle: parse_angle(answer(ParamKey::Angle)?)?,
            },
            OperationId::Compress => OperationParams::Compress {
                level: match answer(ParamKey::Level)?.to_ascii_lowercase().as_str() {
                    "low" => CompressionLevel::Low,
                    "medium" => CompressionLevel::Medium,
                    "high" => CompressionLevel::High,
                    other => return Err(invalid(ParamKey::Level, other, "low, medium or high")),
                },
            },
            OperationId::PdfToWord => OperationParams::PdfToWord,
            OperationId::WordToPdf => OperationParams::WordToPdf,
            OperationId::PdfToImages => OperationParams::PdfToImages {
                format: match answer(ParamKey::Format)?.to_ascii_lowercase().as_str() {
                    "png" => ImageFormat::Png,
                    "jpg" | "jpeg" => ImageFormat::Jpg,
                    other => return Err(invalid(ParamKey::Format, other, "png or jpg")),
                },
            },
            OperationId::ImagesToPdf => OperationParams::ImagesToPdf,
            OperationId::PowerPointToPdf => OperationParams::PowerPointToPdf,
            OperationId::ExcelToPdf => OperationParams::ExcelToPdf,
            OperationId::HtmlToPdf => OperationParams::HtmlToPdf,
            OperationId::PdfToText => OperationParams::PdfToText,
            OperationId::Ocr => OperationParams::Ocr {
                language: answer(ParamKey::Language)?.to_ascii_lowercase(),
            },
            OperationId::Watermark => OperationParams::Watermark {
                text: answer(ParamKey::Text)?.to_string(),
            },
            OperationId::PageNumbers => OperationParams::PageNumbers {
                position: match answer(ParamKey::Position)?.to_ascii_lowercase().as_str() {
                    "top" => NumberPosition::Top,
                    "bottom" => NumberPosition::Bottom,
                    other => return Err(invalid(ParamKey::Position, other, "top or bottom")),
                },
            },
            OperationId::Protect => OperationParams::Protect {
                password: answer(ParamKey::Password)?.to_string(),
            },
            OperationId::Unlock => OperationParams::Unlock {
                password: answer(ParamKey::Password)?.to_string(),
            },
            OperationId::Compare => OperationParams::Compare,
            OperationId::Sign => OperationParams::Sign,
            OperationId::ReversePages => OperationParams::ReversePages,
            OperationId::Grayscale => OperationParams::Grayscale,
            OperationId::EditMetadata => OperationParams::EditMetadata {
                title: answer(ParamKey::Title)?.to_string(),
                author: answer(ParamKey::Author)?.to_string(),
            },
            OperationId::Repair => OperationParams::Repair,
            OperationId::Crop | OperationId::Redact => {
                unreachable!("manual operations are rejected above")
            }
        };
        Ok(params)
    }

    /// Extension the engine should give its primary output.
    pub fn output_extension(&self, operation: OperationId) -> &'static str {
        match self {
            OperationParams::PdfToImages { format } => format.extension(),
            _ => operation.spec().output_extension,
        }
    }
}

fn parse_angle(raw: &str) -> Result<RotationAngle, BotError> {
    match raw {
        "90" => Ok(RotationAngle::Quarter),
        "180" => Ok(RotationAngle::Half),
        "270" => Ok(RotationAngle::ThreeQuarter),
        other => Err(invalid(ParamKey::Angle, other, "90, 180 or 270")),
    }
}

fn invalid(key: ParamKey, got: &str, expected: &str) -> BotError {
    BotError::validation(format!("'{got}' is not a valid {key}. Expected {expected}."))
}
