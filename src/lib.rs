use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepsResult {
    pub ok: bool,
    pub missing: Vec<String>,
}

/// Check the Poppler tools used for PDF input.
/// - Required: pdftotext
/// - Optional: pdfinfo (page count for per-page extraction)
/// `ok` is true iff pdftotext is present. Plain-text input needs nothing.
pub fn check_deps() -> DepsResult {
    let mut missing = Vec::new();

    let has_pdftotext = which::which("pdftotext").is_ok();
    if !has_pdftotext {
        missing.push("pdftotext".to_string());
    }
    // optional
    if which::which("pdfinfo").is_err() {
        missing.push("pdfinfo".to_string());
    }

    DepsResult { ok: has_pdftotext, missing }
}

/// Render install help for missing Poppler tools.
pub fn install_help_for(missing: &[String]) -> String {
    if !missing.iter().any(|m| m == "pdftotext" || m == "pdfinfo") {
        return String::new();
    }
    "Dependência ausente para leitura de PDF. Instale o Poppler:\n  sudo apt install poppler-utils\nOu forneça o texto do Código em .txt (tipo: text)."
        .to_string()
}

// ---- Text normalizer ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    #[serde(alias = "txt", alias = "plain")]
    Text,
}

impl DocumentKind {
    /// Any content type mentioning pdf is a PDF; everything else is read as text.
    pub fn from_content_type(content_type: &str) -> DocumentKind {
        if content_type.to_lowercase().contains("pdf") {
            DocumentKind::Pdf
        } else {
            DocumentKind::Text
        }
    }

    pub fn from_path(path: &Path) -> DocumentKind {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => DocumentKind::Pdf,
            _ => DocumentKind::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Text => "text",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "text" | "txt" | "plain" => Ok(DocumentKind::Text),
            other => Err(format!("unknown document kind: {}", other)),
        }
    }
}

/// Raw document bytes plus the declared media kind. Consumed once by `normalize`.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub kind: DocumentKind,
}

impl Document {
    pub fn new(bytes: Vec<u8>, kind: DocumentKind) -> Self {
        Document { bytes, kind }
    }

    /// Read a file; without an explicit kind it is inferred from the extension.
    pub fn read(path: &Path, kind: Option<DocumentKind>) -> std::io::Result<Document> {
        let bytes = std::fs::read(path)?;
        Ok(Document { bytes, kind: kind.unwrap_or_else(|| DocumentKind::from_path(path)) })
    }
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("UnsupportedFormat: {0}")]
    UnsupportedFormat(String),
    #[error("PdfError: {0}")]
    Pdf(String),
    #[error("IoError: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    pub page_count: usize,
    /// 0-based indices of PDF pages whose extraction failed and were left out.
    pub skipped_pages: Vec<usize>,
}

/// Decode a document into a single text blob.
pub fn normalize(document: &Document) -> Result<String, NormalizeError> {
    normalize_document(document).map(|n| n.text)
}

/// Like `normalize`, keeping page bookkeeping for the caller to report.
pub fn normalize_document(document: &Document) -> Result<NormalizedText, NormalizeError> {
    match document.kind {
        DocumentKind::Text => Ok(NormalizedText {
            text: decode_text(&document.bytes),
            page_count: 1,
            skipped_pages: Vec::new(),
        }),
        DocumentKind::Pdf => {
            // Fail before touching the filesystem when there is nothing to read PDFs with.
            if which::which("pdftotext").is_err() {
                return Err(unsupported_pdf());
            }
            let mut tmp = tempfile::Builder::new()
                .prefix("dosimetria-")
                .suffix(".pdf")
                .tempfile()
                .map_err(|e| NormalizeError::Io(e.to_string()))?;
            tmp.write_all(&document.bytes).map_err(|e| NormalizeError::Io(e.to_string()))?;
            tmp.flush().map_err(|e| NormalizeError::Io(e.to_string()))?;

            let extracted = pdf_extract_pages(tmp.path())?;
            let page_count = extracted.pages.len() + extracted.skipped.len();
            Ok(NormalizedText {
                text: extracted.pages.join("\n"),
                page_count,
                skipped_pages: extracted.skipped,
            })
        }
    }
}

/// UTF-8 first, Latin-1 otherwise. Never fails.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn unsupported_pdf() -> NormalizeError {
    NormalizeError::UnsupportedFormat("pdf: pdftotext not found on PATH".into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPages {
    pub pages: Vec<String>,
    pub skipped: Vec<usize>,
}

/// Extract text pages using Poppler's pdftotext.
/// Per-page extraction with -layout -nopgbrk when pdfinfo provides a page count; a page
/// whose extraction fails is skipped and its index recorded.
/// Falls back to a single pass split on form feed when pdfinfo is missing.
pub fn pdf_extract_pages(path: &Path) -> Result<PdfPages, NormalizeError> {
    let pdftotext = which::which("pdftotext").map_err(|_| unsupported_pdf())?;
    if !path.exists() {
        return Err(NormalizeError::Io(format!("file not found: {}", path.display())));
    }

    let pages_count = match which::which("pdfinfo") {
        Ok(pdfinfo) => match Command::new(pdfinfo).arg(path).output() {
            Ok(out) if out.status.success() => {
                let s = String::from_utf8_lossy(&out.stdout);
                s.lines()
                    .find_map(|line| line.strip_prefix("Pages:"))
                    .and_then(|rest| rest.trim().parse::<usize>().ok())
            }
            _ => None,
        },
        Err(_) => None,
    };

    if let Some(n_pages) = pages_count {
        let mut pages: Vec<String> = Vec::with_capacity(n_pages);
        let mut skipped = Vec::new();
        for i in 1..=n_pages {
            let out = Command::new(&pdftotext)
                .arg("-layout")
                .arg("-nopgbrk")
                .arg("-q")
                .arg("-f")
                .arg(i.to_string())
                .arg("-l")
                .arg(i.to_string())
                .arg(path)
                .arg("-") // write to stdout
                .output();
            match out {
                Ok(o) if o.status.success() => pages.push(decode_text(&o.stdout)),
                _ => skipped.push(i - 1),
            }
        }
        Ok(PdfPages { pages, skipped })
    } else {
        // Single pass without -nopgbrk so page breaks survive as form feeds
        let out = Command::new(&pdftotext)
            .arg("-layout")
            .arg("-q")
            .arg(path)
            .arg("-")
            .output()
            .map_err(|e| NormalizeError::Pdf(e.to_string()))?;
        if !out.status.success() {
            return Err(NormalizeError::Pdf(format!("pdftotext failed on {}", path.display())));
        }
        let s = decode_text(&out.stdout);
        let mut pages: Vec<String> = s.split('\u{000C}').map(|x| x.to_string()).collect();
        // drop trailing empty page if any
        while matches!(pages.last(), Some(last) if last.trim().is_empty()) {
            pages.pop();
        }
        Ok(PdfPages { pages, skipped: Vec::new() })
    }
}

// ---- Article segmenter ----

static ARTICLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:Art\.|Artigo)\s*\.?\s*([0-9]+)").unwrap());

/// Split text into one `(article_number, snippet)` per article marker, in document order.
/// Every occurrence is kept here; `index_articles` applies last-write-wins.
pub fn segment(text: &str) -> Vec<(String, String)> {
    let marks: Vec<(usize, String)> = ARTICLE_RE
        .captures_iter(text)
        .filter_map(|c| Some((c.get(0)?.start(), c.get(1)?.as_str().to_string())))
        .collect();

    let mut out = Vec::with_capacity(marks.len());
    for (i, (start, number)) in marks.iter().enumerate() {
        // sentinel: the last article runs to end-of-text
        let end = marks.get(i + 1).map(|m| m.0).unwrap_or(text.len());
        out.push((number.clone(), text[*start..end].trim().to_string()));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub article_number: String,
    pub snippet: String,
    pub penalty: Option<PenaltyRange>,
}

/// Articles keyed by number in order of first appearance.
/// A repeated number replaces the stored record but keeps its position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleIndex {
    records: Vec<ArticleRecord>,
    positions: HashMap<String, usize>,
    replaced: Vec<String>,
}

impl ArticleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record previously stored under the same number, if any.
    pub fn insert(&mut self, record: ArticleRecord) -> Option<ArticleRecord> {
        let existing = self.positions.get(&record.article_number).copied();
        match existing {
            Some(pos) => {
                self.replaced.push(record.article_number.clone());
                Some(std::mem::replace(&mut self.records[pos], record))
            }
            None => {
                self.positions.insert(record.article_number.clone(), self.records.len());
                self.records.push(record);
                None
            }
        }
    }

    pub fn get(&self, article_number: &str) -> Option<&ArticleRecord> {
        self.positions.get(article_number.trim()).map(|&pos| &self.records[pos])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArticleRecord> {
        self.records.iter()
    }

    pub fn numbers(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.article_number.as_str()).collect()
    }

    /// Numbers whose earlier snippet was overwritten, one entry per overwrite.
    pub fn replaced(&self) -> &[String] {
        &self.replaced
    }
}

/// Segment the text and extract each article's abstract penalty.
pub fn index_articles(text: &str) -> ArticleIndex {
    let mut index = ArticleIndex::new();
    for (article_number, snippet) in segment(text) {
        let penalty = extract_penalty(&snippet);
        index.insert(ArticleRecord { article_number, snippet, penalty });
    }
    index
}

// ---- Penalty extractor ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyRange {
    pub kind: String,
    pub min_years: f64,
    pub max_years: f64,
    pub raw_unit: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangeError {
    #[error("min_years must be a finite value >= 0, got {0}")]
    InvalidMin(f64),
    #[error("max_years must be finite and >= min_years ({min}), got {max}")]
    InvalidMax { min: f64, max: f64 },
}

impl PenaltyRange {
    /// Manually supplied abstract range, always in years.
    pub fn manual(kind: &str, min_years: f64, max_years: f64) -> Result<PenaltyRange, RangeError> {
        if !min_years.is_finite() || min_years < 0.0 {
            return Err(RangeError::InvalidMin(min_years));
        }
        if !max_years.is_finite() || max_years < min_years {
            return Err(RangeError::InvalidMax { min: min_years, max: max_years });
        }
        Ok(PenaltyRange {
            kind: kind.trim().to_string(),
            min_years,
            max_years,
            raw_unit: "anos".to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Years,
    Months,
    Days,
}

impl TimeUnit {
    /// anos/ano, meses/mês/mes, dias/dia in any case.
    pub fn from_token(token: &str) -> Option<TimeUnit> {
        let t = token.trim().to_lowercase();
        if t.starts_with("ano") {
            Some(TimeUnit::Years)
        } else if t.starts_with("mes") || t.starts_with("mês") {
            Some(TimeUnit::Months)
        } else if t.starts_with("dia") {
            Some(TimeUnit::Days)
        } else {
            None
        }
    }

    pub fn to_years(self, value: f64) -> f64 {
        match self {
            TimeUnit::Years => value,
            TimeUnit::Months => value / 12.0,
            TimeUnit::Days => value / 365.0,
        }
    }
}

static PENALTY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?P<kind>reclus[aã]o|deten[cç][aã]o|multa|penas?\b[^.,;\n\d]*)[^\n.;]*?(?:de\s+)?",
        r"(?P<min>\d+(?:[.,]\d+)?)\s*(?:\([^)\n]*\)\s*)?",
        r"(?:(?P<min_unit>anos|ano|meses|m[eê]s|dias|dia)\s*)?",
        r"(?:até|a|-)\s*",
        r"(?P<max>\d+(?:[.,]\d+)?)\s*(?:\([^)\n]*\)\s*)?",
        r"(?P<max_unit>anos|ano|meses|m[eê]s|dias|dia)",
    ))
    .unwrap()
});

static UNIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:anos|ano|meses|m[eê]s|dias|dia)\b").unwrap());

static KIND_TAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[\s,\-–]*\bde$").unwrap());

/// Find the abstract sentencing range in an article snippet.
///
/// Each bound is converted with the unit written next to it ("6 meses a 2 anos" gives
/// 0.5 and 2.0); a bound written without a unit ("de 1 a 4 anos") takes the unit of the
/// other bound. `raw_unit` is the first unit word anywhere in the snippet, for display.
/// Returns `None` when no phrase matches or a number fails to parse.
pub fn extract_penalty(snippet: &str) -> Option<PenaltyRange> {
    let caps = PENALTY_RE.captures(snippet)?;

    let max_unit = TimeUnit::from_token(caps.name("max_unit")?.as_str())?;
    let min_unit = match caps.name("min_unit") {
        Some(m) => TimeUnit::from_token(m.as_str())?,
        None => max_unit,
    };
    let min = parse_decimal(caps.name("min")?.as_str())?;
    let max = parse_decimal(caps.name("max")?.as_str())?;

    let raw_unit = UNIT_RE
        .find(snippet)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "anos".to_string());

    Some(PenaltyRange {
        kind: clean_kind(caps.name("kind")?.as_str()),
        min_years: min_unit.to_years(min),
        max_years: max_unit.to_years(max),
        raw_unit,
    })
}

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok().filter(|v| v.is_finite())
}

// "Penas de" -> "Penas"
fn clean_kind(raw: &str) -> String {
    KIND_TAIL_RE.replace(raw.trim(), "").trim().to_string()
}

// ---- Three-phase calculator ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub label: String,
    /// Signed fraction: 0.20 is +20%, -0.15 is -15%.
    pub fraction: f64,
}

impl Adjustment {
    pub fn new(label: impl Into<String>, fraction: f64) -> Self {
        Adjustment { label: label.into(), fraction }
    }
}

pub fn fractions(adjustments: &[Adjustment]) -> Vec<f64> {
    adjustments.iter().map(|a| a.fraction).collect()
}

/// Phase 1: place the case between the abstract minimum and maximum, then weight it.
/// `percentile` 0 is the minimum, 100 the maximum; `judicial_factor` 1.0 is neutral.
/// No clamping: a factor other than 1.0 may leave the abstract range.
pub fn phase1_base(min_years: f64, max_years: f64, percentile: f64, judicial_factor: f64) -> f64 {
    let base = min_years + (max_years - min_years) * (percentile / 100.0);
    base * judicial_factor
}

/// Multiply `value` by the product of `(1 + a)` over all adjustments.
/// Applied identically in phase 2 and phase 3; an empty list is the identity.
pub fn apply_adjustments(value: f64, adjustments: &[f64]) -> f64 {
    let product: f64 = adjustments.iter().map(|a| 1.0 + a).product();
    value * product
}

/// Years to days, rounding half away from zero (0.5 years is 183 days).
pub fn years_to_days(years: f64) -> i64 {
    (years * 365.0).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentenceResult {
    pub base_years: f64,
    pub provisional_years: f64,
    pub final_years: f64,
    pub final_days: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentenceInputs {
    pub percentile: u8,
    pub judicial_factor: f64,
    /// Aggravating and mitigating circumstances, flattened.
    pub phase2: Vec<Adjustment>,
    /// Increase and decrease causes.
    pub phase3: Vec<Adjustment>,
}

/// Run the three phases over an abstract range. Values are never clamped.
pub fn compute_sentence(range: &PenaltyRange, inputs: &SentenceInputs) -> SentenceResult {
    let base_years = phase1_base(
        range.min_years,
        range.max_years,
        f64::from(inputs.percentile),
        inputs.judicial_factor,
    );
    let provisional_years = apply_adjustments(base_years, &fractions(&inputs.phase2));
    let final_years = apply_adjustments(provisional_years, &fractions(&inputs.phase3));
    SentenceResult { base_years, provisional_years, final_years, final_days: years_to_days(final_years) }
}

// ---- Adjustments supplied by the user ----

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdjustmentParseError {
    #[error("line {line}: missing '|' separator: {text}")]
    MissingSeparator { line: usize, text: String },
    #[error("line {line}: empty label: {text}")]
    EmptyLabel { line: usize, text: String },
    #[error("line {line}: invalid percent: {text}")]
    InvalidPercent { line: usize, text: String },
}

/// Parse one `label|signed_fraction` line, e.g. `Uso de arma|0.50`. `line` is 1-based.
/// A decimal comma is accepted.
pub fn parse_adjustment_line(line: usize, text: &str) -> Result<Adjustment, AdjustmentParseError> {
    let (label, pct) = text.split_once('|').ok_or_else(|| AdjustmentParseError::MissingSeparator {
        line,
        text: text.to_string(),
    })?;
    let label = label.trim();
    if label.is_empty() {
        return Err(AdjustmentParseError::EmptyLabel { line, text: text.to_string() });
    }
    let fraction = parse_decimal(pct.trim())
        .ok_or_else(|| AdjustmentParseError::InvalidPercent { line, text: text.to_string() })?;
    Ok(Adjustment::new(label, fraction))
}

/// Parse free-form cause lines. Blank lines are ignored; malformed lines are returned
/// as errors while the remaining lines are still parsed.
pub fn parse_adjustment_lines(text: &str) -> (Vec<Adjustment>, Vec<AdjustmentParseError>) {
    let mut parsed = Vec::new();
    let mut errors = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        match parse_adjustment_line(i + 1, raw.trim()) {
            Ok(adj) => parsed.push(adj),
            Err(e) => errors.push(e),
        }
    }
    (parsed, errors)
}

/// One selectable circumstance with its suggested percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorToggle {
    pub label: String,
    pub default_percent: f64,
    pub enabled: bool,
    pub effective_percent: Option<f64>,
}

impl FactorToggle {
    pub fn new(label: &str, default_percent: f64) -> Self {
        FactorToggle { label: label.to_string(), default_percent, enabled: false, effective_percent: None }
    }

    pub fn percent(&self) -> f64 {
        self.effective_percent.unwrap_or(self.default_percent)
    }

    pub fn adjustment(&self) -> Option<Adjustment> {
        self.enabled.then(|| Adjustment::new(self.label.clone(), self.percent()))
    }

    fn matches(&self, label: &str) -> bool {
        self.label.trim().to_lowercase() == label.trim().to_lowercase()
    }
}

/// Aggravating circumstances (arts. 61-63) with suggested percentages, all disabled.
pub fn default_aggravating() -> Vec<FactorToggle> {
    vec![
        FactorToggle::new("reincidência (art.63)", 0.20),
        FactorToggle::new("motivo fútil/torpe (art.61 II a)", 0.15),
        FactorToggle::new("uso de violência/emboscada (art.61 II c)", 0.20),
        FactorToggle::new("abuso de poder (art.61 II g)", 0.20),
    ]
}

/// Mitigating circumstances (art. 65) with suggested percentages, all disabled.
pub fn default_mitigating() -> Vec<FactorToggle> {
    vec![
        FactorToggle::new("menor de 21 / maior de 70 (art.65 I)", -0.20),
        FactorToggle::new("arrependimento/regular reparação (art.65 III b)", -0.20),
        FactorToggle::new("confissão espontânea (art.65 III d)", -0.10),
        FactorToggle::new("coação/violenta emoção (art.65 III c)", -0.15),
    ]
}

/// Judicial circumstances of art. 59. A case file may only name these (case-insensitive);
/// they are recorded in the report and do not enter the arithmetic.
pub const JUDICIAL_CIRCUMSTANCES: &[&str] = &[
    "culpabilidade",
    "antecedentes",
    "conduta social",
    "personalidade",
    "motivos",
    "circunstâncias",
    "consequências",
    "comportamento da vítima",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSelection {
    pub label: String,
    #[serde(default)]
    pub percent: Option<f64>,
}

/// Enable the selected catalog entries (case-insensitive label match), optionally
/// overriding their percentage. Labels outside the catalog are appended as custom
/// factors and must carry a percent.
pub fn select_factors(
    mut catalog: Vec<FactorToggle>,
    selections: &[FactorSelection],
) -> Result<Vec<FactorToggle>, CaseError> {
    for sel in selections {
        if let Some(p) = sel.percent {
            if !p.is_finite() {
                return Err(CaseError::Invalid(format!("percent for '{}' is not finite", sel.label)));
            }
        }
        match catalog.iter_mut().find(|t| t.matches(&sel.label)) {
            Some(toggle) => {
                toggle.enabled = true;
                toggle.effective_percent = sel.percent;
            }
            None => {
                let percent = sel.percent.ok_or_else(|| {
                    CaseError::Invalid(format!("unknown factor without percent: {}", sel.label))
                })?;
                let mut custom = FactorToggle::new(sel.label.trim(), percent);
                custom.enabled = true;
                catalog.push(custom);
            }
        }
    }
    Ok(catalog)
}

pub fn enabled_adjustments(toggles: &[FactorToggle]) -> Vec<Adjustment> {
    toggles.iter().filter_map(|t| t.adjustment()).collect()
}

// ---- Case file ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseFile {
    pub document: CaseDocument,
    #[serde(deserialize_with = "article_key")]
    pub article: String,
    #[serde(default)]
    pub manual_penalty: Option<ManualPenalty>,
    #[serde(default = "default_percentile")]
    pub percentile: u32,
    #[serde(default = "default_judicial_factor")]
    pub judicial_factor: f64,
    #[serde(default)]
    pub judicial_circumstances: Vec<String>,
    #[serde(default)]
    pub aggravating: Vec<FactorSelection>,
    #[serde(default)]
    pub mitigating: Vec<FactorSelection>,
    /// `label|signed_fraction` lines for phase 3.
    #[serde(default)]
    pub causes: String,
    #[serde(default)]
    pub output: Option<CaseOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDocument {
    pub path: String,
    #[serde(default)]
    pub kind: Option<DocumentKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualPenalty {
    #[serde(default = "default_manual_kind")]
    pub kind: String,
    pub min_years: f64,
    pub max_years: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseOutput {
    pub dir: Option<String>,
}

fn default_percentile() -> u32 {
    50
}

fn default_judicial_factor() -> f64 {
    1.0
}

fn default_manual_kind() -> String {
    "reclusão".to_string()
}

// `article: 155` and `article: "155"` are both accepted
fn article_key<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Key {
        Text(String),
        Number(u64),
    }
    Ok(match Key::deserialize(d)? {
        Key::Text(s) => s.trim().to_string(),
        Key::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Error)]
pub enum CaseError {
    #[error("Failed to read case file: {0}")]
    Read(String),
    #[error("Failed to parse case file: {0}")]
    Parse(String),
    #[error("Invalid case: {0}")]
    Invalid(String),
}

/// Read and validate a YAML case file.
pub fn validate_case(case_path: &Path) -> Result<CaseFile, CaseError> {
    let raw = std::fs::read_to_string(case_path).map_err(|e| CaseError::Read(e.to_string()))?;
    let case: CaseFile = serde_yaml::from_str(&raw).map_err(|e| CaseError::Parse(e.to_string()))?;

    if case.document.path.trim().is_empty() {
        return Err(CaseError::Invalid("missing document.path".into()));
    }
    if case.article.is_empty() {
        return Err(CaseError::Invalid("missing article".into()));
    }
    if case.percentile > 100 {
        return Err(CaseError::Invalid(format!("percentile must be within 0..=100, got {}", case.percentile)));
    }
    if !case.judicial_factor.is_finite() || case.judicial_factor < 0.0 {
        return Err(CaseError::Invalid(format!("judicial_factor must be >= 0, got {}", case.judicial_factor)));
    }
    if let Some(Err(e)) = case.manual_range() {
        return Err(CaseError::Invalid(format!("manual_penalty: {}", e)));
    }
    for c in &case.judicial_circumstances {
        let wanted = c.trim().to_lowercase();
        if !JUDICIAL_CIRCUMSTANCES.iter().any(|k| *k == wanted) {
            return Err(CaseError::Invalid(format!("unknown judicial circumstance: {}", c)));
        }
    }
    // Resolve factors now so unknown labels fail before any document is read
    select_factors(default_aggravating(), &case.aggravating)?;
    select_factors(default_mitigating(), &case.mitigating)?;

    Ok(case)
}

impl CaseFile {
    pub fn document_kind(&self) -> DocumentKind {
        self.document.kind.unwrap_or_else(|| DocumentKind::from_path(Path::new(&self.document.path)))
    }

    pub fn output_dir(&self) -> String {
        self.output
            .as_ref()
            .and_then(|o| o.dir.clone())
            .unwrap_or_else(|| "./output".to_string())
    }

    pub fn manual_range(&self) -> Option<Result<PenaltyRange, RangeError>> {
        self.manual_penalty
            .as_ref()
            .map(|m| PenaltyRange::manual(&m.kind, m.min_years, m.max_years))
    }

    /// Percentile as validated by `validate_case`; larger values saturate at 100.
    pub fn percentile(&self) -> u8 {
        self.percentile.min(100) as u8
    }
}

// ---- Report ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PenaltySource {
    Extracted,
    Manual,
}

/// Everything the three phases need besides the abstract range, as selected by the user.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SentenceCase {
    pub percentile: u8,
    pub judicial_factor: f64,
    pub judicial_circumstances: Vec<String>,
    pub aggravating: Vec<Adjustment>,
    pub mitigating: Vec<Adjustment>,
    pub causes: Vec<Adjustment>,
}

impl SentenceCase {
    pub fn inputs(&self) -> SentenceInputs {
        let mut phase2 = self.aggravating.clone();
        phase2.extend(self.mitigating.iter().cloned());
        SentenceInputs {
            percentile: self.percentile,
            judicial_factor: self.judicial_factor,
            phase2,
            phase3: self.causes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosimetryReport {
    pub article: String,
    pub abstract_penalty: PenaltyRange,
    pub penalty_source: PenaltySource,
    pub percentile: u8,
    pub judicial_factor: f64,
    pub judicial_circumstances: Vec<String>,
    pub aggravating: Vec<Adjustment>,
    pub mitigating: Vec<Adjustment>,
    pub causes: Vec<Adjustment>,
    pub result: SentenceResult,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Compute the sentence and assemble the report. Year values are rounded to 4 decimals;
/// `final_days` comes from the unrounded final value. Out-of-range values are reported as
/// warnings, never clamped.
pub fn build_report(
    article: &str,
    penalty: &PenaltyRange,
    source: PenaltySource,
    case: &SentenceCase,
) -> DosimetryReport {
    let raw = compute_sentence(penalty, &case.inputs());

    let mut warnings = Vec::new();
    if raw.base_years < penalty.min_years || raw.base_years > penalty.max_years {
        warnings.push(format!(
            "pena-base {:.3} anos fora do intervalo abstrato ({} a {} anos)",
            raw.base_years, penalty.min_years, penalty.max_years
        ));
    }
    if raw.final_years <= 0.0 {
        warnings.push(format!("pena definitiva não positiva: {:.3} anos", raw.final_years));
    }

    DosimetryReport {
        article: article.to_string(),
        abstract_penalty: penalty.clone(),
        penalty_source: source,
        percentile: case.percentile,
        judicial_factor: case.judicial_factor,
        judicial_circumstances: case.judicial_circumstances.clone(),
        aggravating: case.aggravating.clone(),
        mitigating: case.mitigating.clone(),
        causes: case.causes.clone(),
        result: SentenceResult {
            base_years: round4(raw.base_years),
            provisional_years: round4(raw.provisional_years),
            final_years: round4(raw.final_years),
            final_days: raw.final_days,
        },
        warnings,
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn render_adjustments(out: &mut Vec<String>, title: &str, adjustments: &[Adjustment]) {
    out.push(format!("### {}", title));
    if adjustments.is_empty() {
        out.push("- nenhuma".to_string());
    }
    for a in adjustments {
        out.push(format!("- {}: {:+.0}%", a.label, a.fraction * 100.0));
    }
    out.push(String::new());
}

/// Render the report as a Portuguese Markdown summary.
pub fn render_markdown(report: &DosimetryReport) -> String {
    let p = &report.abstract_penalty;
    let r = &report.result;
    let mut out = vec![
        format!("# Dosimetria da pena — Art. {}", report.article),
        String::new(),
        format!(
            "Pena abstrata: {} de {} a {} anos (unidade original: {}; {})",
            p.kind,
            p.min_years,
            p.max_years,
            p.raw_unit,
            match report.penalty_source {
                PenaltySource::Extracted => "extraída do texto",
                PenaltySource::Manual => "informada manualmente",
            }
        ),
        String::new(),
        "## Fase 1 — Pena-base (art. 59)".to_string(),
        format!("- Posição entre mínimo e máximo: {}%", report.percentile),
        format!("- Culpabilidade (peso): {}", report.judicial_factor),
    ];
    if !report.judicial_circumstances.is_empty() {
        out.push(format!("- Circunstâncias judiciais: {}", report.judicial_circumstances.join(", ")));
    }
    out.push(format!("- Pena-base: **{:.3} anos**", r.base_years));
    out.push(String::new());

    out.push("## Fase 2 — Agravantes e atenuantes (arts. 61 / 65)".to_string());
    render_adjustments(&mut out, "Agravantes", &report.aggravating);
    render_adjustments(&mut out, "Atenuantes", &report.mitigating);
    out.push(format!("Pena provisória: **{:.3} anos**", r.provisional_years));
    out.push(String::new());

    out.push("## Fase 3 — Causas de aumento / diminuição".to_string());
    render_adjustments(&mut out, "Causas", &report.causes);
    out.push(format!(
        "Pena definitiva: **{:.3} anos** — equivalente a {} dias (aprox.)",
        r.final_years, r.final_days
    ));

    if !report.warnings.is_empty() {
        out.push(String::new());
        out.push("## Avisos".to_string());
        for w in &report.warnings {
            out.push(format!("- {}", w));
        }
    }
    out.push(String::new());
    out.push("_Ferramenta de apoio ao cálculo; não substitui a fundamentação judicial._".to_string());
    out.join("\n")
}

/// SHA-256 of the report's canonical JSON; identical inputs give identical fingerprints.
pub fn report_fingerprint(report: &DosimetryReport) -> String {
    let bytes = serde_json::to_vec(report).unwrap_or_default();
    sha256_hex(&bytes)
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("WriteFailed: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitPaths {
    pub md_path: String,
    pub report_path: String,
}

/// Atomically write `<stem>.md` and `<stem>.report.json` into outdir.
/// The JSON carries `report_fingerprint` and a `generated_ms` timestamp outside the fingerprint.
pub fn emit_report(report: &DosimetryReport, outdir: &str, stem: &str) -> Result<EmitPaths, EmitError> {
    std::fs::create_dir_all(outdir).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    let md_path = Path::new(outdir).join(format!("{}.md", stem));
    let report_path = Path::new(outdir).join(format!("{}.report.json", stem));

    let mut value = serde_json::to_value(report).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    let generated_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("report_fingerprint".to_string(), serde_json::json!(report_fingerprint(report)));
        obj.insert("generated_ms".to_string(), serde_json::json!(generated_ms));
    }

    // Write temp files then rename
    let pid = std::process::id();
    let md_tmp = md_path.with_extension(format!("md.tmp.{}", pid));
    let report_tmp = report_path.with_extension(format!("json.tmp.{}", pid));

    std::fs::write(&md_tmp, render_markdown(report)).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    let bytes = serde_json::to_vec_pretty(&value).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    std::fs::write(&report_tmp, bytes).map_err(|e| EmitError::WriteFailed(e.to_string()))?;

    std::fs::rename(&md_tmp, &md_path).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    std::fs::rename(&report_tmp, &report_path).map_err(|e| EmitError::WriteFailed(e.to_string()))?;

    Ok(EmitPaths {
        md_path: md_path.to_string_lossy().to_string(),
        report_path: report_path.to_string_lossy().to_string(),
    })
}

// Utility to compute sha256 hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    out.iter().map(|b| format!("{:02x}", b)).collect()
}
