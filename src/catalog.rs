//! The operation catalog: a static table of every workflow the bot offers.
//!
//! Each [`OperationSpec`] says how many files of which kind the operation
//! consumes, how file collection ends ([`CompletionMode`]), and which
//! follow-up questions must be answered before it can run. Looking an entry
//! up is a pure function; nothing here touches session state.

use crate::selector;
use crate::session::FileKind;
use serde::Serialize;
use std::fmt;

/// Identifier of one catalog entry. Discriminants are the menu codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationId {
    Merge = 1,
    Split = 2,
    ExtractPages = 3,
    RemovePages = 4,
    Rotate = 5,
    Compress = 6,
    PdfToWord = 7,
    WordToPdf = 8,
    PdfToImages = 9,
    ImagesToPdf = 10,
    PowerPointToPdf = 11,
    ExcelToPdf = 12,
    HtmlToPdf = 13,
    PdfToText = 14,
    Ocr = 15,
    Watermark = 16,
    PageNumbers = 17,
    Protect = 18,
    Unlock = 19,
    Compare = 20,
    Sign = 21,
    Crop = 22,
    Redact = 23,
    ReversePages = 24,
    Grayscale = 25,
    EditMetadata = 26,
    Repair = 27,
}

impl OperationId {
    /// Menu number shown to the user.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Stable snake_case identifier (also the engine script name).
    pub fn as_str(self) -> &'static str {
        match self {
            OperationId::Merge => "merge",
            OperationId::Split => "split",
            OperationId::ExtractPages => "extract_pages",
            OperationId::RemovePages => "remove_pages",
            OperationId::Rotate => "rotate",
            OperationId::Compress => "compress",
            OperationId::PdfToWord => "pdf_to_word",
            OperationId::WordToPdf => "word_to_pdf",
            OperationId::PdfToImages => "pdf_to_images",
            OperationId::ImagesToPdf => "images_to_pdf",
            OperationId::PowerPointToPdf => "powerpoint_to_pdf",
            OperationId::ExcelToPdf => "excel_to_pdf",
            OperationId::HtmlToPdf => "html_to_pdf",
            OperationId::PdfToText => "pdf_to_text",
            OperationId::Ocr => "ocr",
            OperationId::Watermark => "watermark",
            OperationId::PageNumbers => "page_numbers",
            OperationId::Protect => "protect",
            OperationId::Unlock => "unlock",
            OperationId::Compare => "compare",
            OperationId::Sign => "sign",
            OperationId::Crop => "crop",
            OperationId::Redact => "redact",
            OperationId::ReversePages => "reverse_pages",
            OperationId::Grayscale => "grayscale",
            OperationId::EditMetadata => "edit_metadata",
            OperationId::Repair => "repair",
        }
    }

    pub fn spec(self) -> &'static OperationSpec {
        // CATALOG is ordered by code, starting at 1.
        &CATALOG[self.code() as usize - 1]
    }

    pub fn all() -> impl Iterator<Item = OperationId> {
        CATALOG.iter().map(|spec| spec.id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a follow-up question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKey {
    Pages,
    Angle,
    Level,
    Format,
    Language,
    Text,
    Position,
    Password,
    Title,
    Author,
}

impl ParamKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamKey::Pages => "pages",
            ParamKey::Angle => "angle",
            ParamKey::Level => "level",
            ParamKey::Format => "format",
            ParamKey::Language => "language",
            ParamKey::Text => "text",
            ParamKey::Position => "position",
            ParamKey::Password => "password",
            ParamKey::Title => "title",
            ParamKey::Author => "author",
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer-time check for a follow-up question. `Err` carries guidance.
pub type Validator = fn(&str) -> Result<(), String>;

/// One follow-up question.
#[derive(Debug)]
pub struct Question {
    pub key: ParamKey,
    pub prompt: &'static str,
    pub validate: Validator,
}

/// Which file kinds an operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepts {
    Only(FileKind),
    AnyOf(&'static [FileKind]),
    AnyDocument,
}

impl Accepts {
    pub fn allows(self, kind: FileKind) -> bool {
        match self {
            Accepts::Only(k) => k == kind,
            Accepts::AnyOf(kinds) => kinds.contains(&kind),
            Accepts::AnyDocument => kind != FileKind::Unknown,
        }
    }

    pub fn describe(self) -> String {
        match self {
            Accepts::Only(k) => k.label().to_string(),
            Accepts::AnyOf(kinds) => kinds
                .iter()
                .map(|k| k.label())
                .collect::<Vec<_>>()
                .join(" or "),
            Accepts::AnyDocument => "document".to_string(),
        }
    }
}

/// File-count and file-type requirement.
#[derive(Debug, Clone, Copy)]
pub struct FileRule {
    pub min: usize,
    pub max: usize,
    pub accepts: Accepts,
}

/// How file collection ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Advance as soon as `min` files are present.
    SingleShot,
    /// Keep collecting until the user sends `done`; then `min` is enforced.
    UntilDone,
    /// Collect exactly one file per slot kind, then run automatically.
    FixedSlots(&'static [FileKind]),
}

/// Whether an entry can run through the conversational flow at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Interactive,
    /// Needs coordinate input the chat flow cannot collect.
    ManualCoordinatesRequired,
}

/// Static description of one operation.
#[derive(Debug)]
pub struct OperationSpec {
    pub id: OperationId,
    pub title: &'static str,
    pub files: FileRule,
    pub completion: CompletionMode,
    pub questions: &'static [Question],
    pub output_extension: &'static str,
    pub availability: Availability,
}

impl OperationSpec {
    pub fn question(&self, key: ParamKey) -> Option<&'static Question> {
        self.questions.iter().find(|q| q.key == key)
    }

    /// Whether building parameters needs the first input's page count.
    pub fn needs_page_count(&self) -> bool {
        self.questions.iter().any(|q| q.key == ParamKey::Pages)
    }

    /// Whether `kind` may join `current` files for this operation.
    pub fn accepts_next(&self, current: &[FileKind], kind: FileKind) -> bool {
        match self.completion {
            CompletionMode::FixedSlots(slots) => open_slots(slots, current).contains(&kind),
            _ => current.len() < self.files.max && self.files.accepts.allows(kind),
        }
    }

    /// Slot kinds of a fixed-count operation that are still unfilled.
    pub fn missing_slots(&self, current: &[FileKind]) -> Vec<FileKind> {
        match self.completion {
            CompletionMode::FixedSlots(slots) => open_slots(slots, current),
            _ => Vec::new(),
        }
    }

    /// Describe what the next upload should be.
    pub fn file_prompt(&self, current: &[FileKind]) -> String {
        match self.completion {
            CompletionMode::FixedSlots(_) => match self.missing_slots(current).first() {
                Some(kind) => format!("Send the {} ({} of {}).", kind.label(), current.len() + 1, self.files.max),
                None => "All files received.".to_string(),
            },
            CompletionMode::UntilDone => {
                if current.is_empty() {
                    format!(
                        "Send the {} files one by one (at least {}). Send done when finished.",
                        self.files.accepts.describe(),
                        self.files.min
                    )
                } else {
                    format!(
                        "Received {} file(s). Send another {} or done to continue.",
                        current.len(),
                        self.files.accepts.describe()
                    )
                }
            }
            CompletionMode::SingleShot => {
                format!("Send the {} to process.", self.files.accepts.describe())
            }
        }
    }
}

fn open_slots(slots: &[FileKind], current: &[FileKind]) -> Vec<FileKind> {
    let mut open = slots.to_vec();
    for kind in current {
        if let Some(pos) = open.iter().position(|k| k == kind) {
            open.remove(pos);
        }
    }
    open
}

/// Look up an entry by its menu number.
pub fn lookup_code(code: u8) -> Option<&'static OperationSpec> {
    CATALOG.iter().find(|spec| spec.id.code() == code)
}

/// Look up an entry from user text (`"7"`, `" 12 "`).
pub fn lookup_text(text: &str) -> Option<&'static OperationSpec> {
    text.trim().parse::<u8>().ok().and_then(lookup_code)
}

/// The numbered menu shown for `menu`/`start`/`help`.
pub fn menu_text() -> String {
    let mut out = String::from("Choose an operation by sending its number:\n");
    for spec in CATALOG {
        out.push_str(&format!("{:>2}. {}\n", spec.id.code(), spec.title));
    }
    out.push_str("\nCommands: menu, cancel, clear, done");
    out
}

// ── Validators ───────────────────────────────────────────────────────────

fn non_empty(raw: &str) -> Result<(), String> {
    if raw.trim().is_empty() {
        Err("Please send some text.".to_string())
    } else {
        Ok(())
    }
}

fn page_selector(raw: &str) -> Result<(), String> {
    selector::check_syntax(raw).map_err(|e| e.to_string())
}

fn one_of(raw: &str, options: &[&str]) -> Result<(), String> {
    let answer = raw.trim().to_ascii_lowercase();
    if options.contains(&answer.as_str()) {
        Ok(())
    } else {
        Err(format!("Please answer one of: {}.", options.join(", ")))
    }
}

fn rotation(raw: &str) -> Result<(), String> {
    one_of(raw, &["90", "180", "270"])
}

fn compression_level(raw: &str) -> Result<(), String> {
    one_of(raw, &["low", "medium", "high"])
}

fn image_format(raw: &str) -> Result<(), String> {
    one_of(raw, &["png", "jpg"])
}

fn number_position(raw: &str) -> Result<(), String> {
    one_of(raw, &["top", "bottom"])
}

fn ocr_language(raw: &str) -> Result<(), String> {
    let code = raw.trim();
    if (2..=8).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphabetic() || c == '+') {
        Ok(())
    } else {
        Err("Send a language code such as eng, deu or eng+fra.".to_string())
    }
}

fn password(raw: &str) -> Result<(), String> {
    if raw.trim().chars().count() < 4 {
        Err("The password must be at least 4 characters.".to_string())
    } else {
        Ok(())
    }
}

// ── Questions ────────────────────────────────────────────────────────────

const Q_PAGES: Question = Question {
    key: ParamKey::Pages,
    prompt: "Which pages? e.g. 1-3,5 or 4- or all",
    validate: page_selector,
};
const Q_ANGLE: Question = Question {
    key: ParamKey::Angle,
    prompt: "Rotate by how many degrees clockwise? (90, 180 or 270)",
    validate: rotation,
};
const Q_LEVEL: Question = Question {
    key: ParamKey::Level,
    prompt: "Compression level? (low, medium or high)",
    validate: compression_level,
};
const Q_FORMAT: Question = Question {
    key: ParamKey::Format,
    prompt: "Image format? (png or jpg)",
    validate: image_format,
};
const Q_LANGUAGE: Question = Question {
    key: ParamKey::Language,
    prompt: "Document language? (e.g. eng, deu, eng+fra)",
    validate: ocr_language,
};
const Q_WATERMARK: Question = Question {
    key: ParamKey::Text,
    prompt: "What watermark text should be stamped on each page?",
    validate: non_empty,
};
const Q_POSITION: Question = Question {
    key: ParamKey::Position,
    prompt: "Put page numbers at the top or bottom?",
    validate: number_position,
};
const Q_NEW_PASSWORD: Question = Question {
    key: ParamKey::Password,
    prompt: "Which password should protect the PDF?",
    validate: password,
};
const Q_CURRENT_PASSWORD: Question = Question {
    key: ParamKey::Password,
    prompt: "What is the PDF's current password?",
    validate: non_empty,
};
const Q_TITLE: Question = Question {
    key: ParamKey::Title,
    prompt: "New document title?",
    validate: non_empty,
};
const Q_AUTHOR: Question = Question {
    key: ParamKey::Author,
    prompt: "New document author?",
    validate: non_empty,
};

// ── Table ────────────────────────────────────────────────────────────────

const ONE_PDF: FileRule = FileRule {
    min: 1,
    max: 1,
    accepts: Accepts::Only(FileKind::Pdf),
};

const fn one(kind: FileKind) -> FileRule {
    FileRule {
        min: 1,
        max: 1,
        accepts: Accepts::Only(kind),
    }
}

const fn single(
    id: OperationId,
    title: &'static str,
    files: FileRule,
    questions: &'static [Question],
    output_extension: &'static str,
) -> OperationSpec {
    OperationSpec {
        id,
        title,
        files,
        completion: CompletionMode::SingleShot,
        questions,
        output_extension,
        availability: Availability::Interactive,
    }
}

const fn manual(id: OperationId, title: &'static str) -> OperationSpec {
    OperationSpec {
        id,
        title,
        files: ONE_PDF,
        completion: CompletionMode::SingleShot,
        questions: &[],
        output_extension: "pdf",
        availability: Availability::ManualCoordinatesRequired,
    }
}

/// Every operation, ordered by menu code.
pub static CATALOG: &[OperationSpec] = &[
    OperationSpec {
        id: OperationId::Merge,
        title: "Merge PDFs",
        files: FileRule {
            min: 2,
            max: 50,
            accepts: Accepts::Only(FileKind::Pdf),
        },
        completion: CompletionMode::UntilDone,
        questions: &[],
        output_extension: "pdf",
        availability: Availability::Interactive,
    },
    single(OperationId::Split, "Split PDF into single pages", ONE_PDF, &[Q_PAGES], "pdf"),
    single(OperationId::ExtractPages, "Extract pages", ONE_PDF, &[Q_PAGES], "pdf"),
    single(OperationId::RemovePages, "Remove pages", ONE_PDF, &[Q_PAGES], "pdf"),
    single(OperationId::Rotate, "Rotate pages", ONE_PDF, &[Q_PAGES, Q_ANGLE], "pdf"),
    single(OperationId::Compress, "Compress PDF", ONE_PDF, &[Q_LEVEL], "pdf"),
    single(OperationId::PdfToWord, "PDF to Word", ONE_PDF, &[], "docx"),
    single(OperationId::WordToPdf, "Word to PDF", one(FileKind::Word), &[], "pdf"),
    single(OperationId::PdfToImages, "PDF to images", ONE_PDF, &[Q_FORMAT], "png"),
    OperationSpec {
        id: OperationId::ImagesToPdf,
        title: "Images to PDF",
        files: FileRule {
            min: 1,
            max: 50,
            accepts: Accepts::Only(FileKind::Image),
        },
        completion: CompletionMode::UntilDone,
        questions: &[],
        output_extension: "pdf",
        availability: Availability::Interactive,
    },
    single(OperationId::PowerPointToPdf, "PowerPoint to PDF", one(FileKind::PowerPoint), &[], "pdf"),
    single(OperationId::ExcelToPdf, "Excel to PDF", one(FileKind::Excel), &[], "pdf"),
    single(OperationId::HtmlToPdf, "HTML to PDF", one(FileKind::Html), &[], "pdf"),
    single(OperationId::PdfToText, "PDF to text", ONE_PDF, &[], "txt"),
    single(
        OperationId::Ocr,
        "OCR (make scanned text searchable)",
        FileRule {
            min: 1,
            max: 1,
            accepts: Accepts::AnyOf(&[FileKind::Pdf, FileKind::Image]),
        },
        &[Q_LANGUAGE],
        "pdf",
    ),
    single(OperationId::Watermark, "Add watermark", ONE_PDF, &[Q_WATERMARK], "pdf"),
    single(OperationId::PageNumbers, "Add page numbers", ONE_PDF, &[Q_POSITION], "pdf"),
    single(OperationId::Protect, "Protect with password", ONE_PDF, &[Q_NEW_PASSWORD], "pdf"),
    single(OperationId::Unlock, "Remove password", ONE_PDF, &[Q_CURRENT_PASSWORD], "pdf"),
    OperationSpec {
        id: OperationId::Compare,
        title: "Compare two PDFs",
        files: FileRule {
            min: 2,
            max: 2,
            accepts: Accepts::Only(FileKind::Pdf),
        },
        completion: CompletionMode::FixedSlots(&[FileKind::Pdf, FileKind::Pdf]),
        questions: &[],
        output_extension: "pdf",
        availability: Availability::Interactive,
    },
    OperationSpec {
        id: OperationId::Sign,
        title: "Sign PDF with a signature image",
        files: FileRule {
            min: 2,
            max: 2,
            accepts: Accepts::AnyOf(&[FileKind::Pdf, FileKind::Image]),
        },
        completion: CompletionMode::FixedSlots(&[FileKind::Pdf, FileKind::Image]),
        questions: &[],
        output_extension: "pdf",
        availability: Availability::Interactive,
    },
    manual(OperationId::Crop, "Crop pages"),
    manual(OperationId::Redact, "Redact areas"),
    single(OperationId::ReversePages, "Reverse page order", ONE_PDF, &[], "pdf"),
    single(OperationId::Grayscale, "Convert to grayscale", ONE_PDF, &[], "pdf"),
    single(
        OperationId::EditMetadata,
        "Edit title and author",
        ONE_PDF,
        &[Q_TITLE, Q_AUTHOR],
        "pdf",
    ),
    single(OperationId::Repair, "Repair damaged PDF", ONE_PDF, &[], "pdf"),
];
