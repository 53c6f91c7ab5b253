use std::path::Path;

use dosimetria::{
    build_report, check_deps, default_aggravating, default_mitigating, emit_report, enabled_adjustments,
    index_articles, install_help_for, normalize_document, parse_adjustment_lines, select_factors, validate_case,
    ArticleIndex, Document, DocumentKind, NormalizeError, PenaltySource, SentenceCase,
};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("articles") => run_articles(&args[2..]),
        Some("deps") => run_deps(),
        Some("compute") => run_compute(&args[2..]),
        // default: compute with ./case.yaml
        _ => run_compute(&args[1..]),
    }
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    let pos = args.iter().position(|a| a == name)?;
    args.get(pos + 1).map(|s| s.as_str()).filter(|v| !v.starts_with("--"))
}

// first argument that is neither a flag nor a flag's value
fn positional(args: &[String]) -> Option<&str> {
    let mut skip_next = false;
    for a in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if a.starts_with("--") {
            skip_next = true;
            continue;
        }
        return Some(a.as_str());
    }
    None
}

fn slugify(base: &str) -> String {
    let lower = base.to_lowercase();
    let mut collapsed = String::with_capacity(lower.len());
    let mut prev_dash = false;
    for ch in lower.chars() {
        if ch.is_ascii_alphanumeric() {
            collapsed.push(ch);
            prev_dash = false;
        } else if !prev_dash {
            collapsed.push('-');
            prev_dash = true;
        }
    }
    let trimmed = collapsed.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "caso".to_string()
    } else {
        trimmed
    }
}

fn run_deps() {
    let deps = check_deps();
    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"check_deps",
            "ok": deps.ok,
            "missing": deps.missing
        })
    );
    let help = install_help_for(&deps.missing);
    if !help.is_empty() {
        eprintln!("{}", help);
    }
    if !deps.ok {
        std::process::exit(2);
    }
}

/// Read and normalize a document, then index its articles. Exits on fatal errors.
fn load_articles(path: &Path, kind: DocumentKind) -> ArticleIndex {
    let document = match Document::read(path, Some(kind)) {
        Ok(d) => d,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool":"read_document",
                    "file": path,
                    "error": e.to_string(),
                    "error_code": 1
                })
            );
            std::process::exit(1);
        }
    };

    let normalized = match normalize_document(&document) {
        Ok(n) => n,
        Err(err) => {
            let (code, label) = match &err {
                NormalizeError::UnsupportedFormat(_) => (2, "UnsupportedFormat"),
                NormalizeError::Pdf(_) => (1, "PdfError"),
                NormalizeError::Io(_) => (1, "IoError"),
            };
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool":"normalize",
                    "file": path,
                    "kind": kind.as_str(),
                    "error": label,
                    "detail": err.to_string(),
                    "error_code": code
                })
            );
            if code == 2 {
                let help = install_help_for(&check_deps().missing);
                if !help.is_empty() {
                    eprintln!("{}", help);
                }
            }
            std::process::exit(code);
        }
    };
    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"normalize",
            "file": path,
            "kind": kind.as_str(),
            "pages": normalized.page_count,
            "length": normalized.text.len()
        })
    );
    if !normalized.skipped_pages.is_empty() {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"normalize",
                "file": path,
                "warning":"PageExtractionFailure",
                "skipped_pages": normalized.skipped_pages
            })
        );
    }

    let index = index_articles(&normalized.text);
    let with_penalty = index.iter().filter(|r| r.penalty.is_some()).count();
    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"index_articles",
            "file": path,
            "articles": index.len(),
            "with_penalty": with_penalty,
            "replaced": index.replaced()
        })
    );
    index
}

fn run_articles(args: &[String]) {
    let Some(file) = positional(args) else {
        eprintln!("uso: dosimetria articles <arquivo> [--kind pdf|text] [--limit N]");
        std::process::exit(1);
    };
    let path = Path::new(file);
    let kind = match flag_value(args, "--kind") {
        Some(v) => match v.parse::<DocumentKind>() {
            Ok(k) => k,
            Err(e) => {
                eprintln!(
                    "{}",
                    serde_json::json!({"tool":"parse_args","flag":"--kind","value":v,"error":e,"error_code":1})
                );
                std::process::exit(1);
            }
        },
        None => DocumentKind::from_path(path),
    };
    let limit = flag_value(args, "--limit").and_then(|v| v.parse::<usize>().ok()).unwrap_or(30);

    let index = load_articles(path, kind);
    if index.is_empty() {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"index_articles",
                "file": path,
                "error":"NoArticlesFound",
                "error_code": 1
            })
        );
        std::process::exit(1);
    }

    for record in index.iter().take(limit) {
        match &record.penalty {
            Some(p) => println!(
                "Art. {} — pena abstrata: {} de {:.4} a {:.4} anos (unidade original: {})",
                record.article_number, p.kind, p.min_years, p.max_years, p.raw_unit
            ),
            None => println!("Art. {} — pena não identificada automaticamente.", record.article_number),
        }
    }
}

fn run_compute(args: &[String]) {
    let case_arg = positional(args).unwrap_or("case.yaml");
    let case_path = Path::new(case_arg);

    // 1) Read and validate the case file
    let case = match validate_case(case_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool":"validate_case",
                    "file": case_path,
                    "error": e.to_string(),
                    "error_code": 3
                })
            );
            std::process::exit(3);
        }
    };
    let outdir = flag_value(args, "--out").map(|s| s.to_string()).unwrap_or_else(|| case.output_dir());
    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"validate_case",
            "file": case_path,
            "status":"ok",
            "document": case.document.path,
            "article": case.article,
            "output_dir": outdir
        })
    );

    // 2) Document -> articles
    let kind = case.document_kind();
    let index = load_articles(Path::new(&case.document.path), kind);

    let Some(record) = index.get(&case.article) else {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"select_article",
                "article": case.article,
                "error":"ArticleNotFound",
                "available": index.numbers().into_iter().take(30).collect::<Vec<_>>(),
                "error_code": 1
            })
        );
        std::process::exit(1);
    };

    // 3) Abstract penalty: extracted, else the manual override
    let (penalty, source) = match (&record.penalty, case.manual_range()) {
        (Some(p), _) => (p.clone(), PenaltySource::Extracted),
        (None, Some(Ok(p))) => (p, PenaltySource::Manual),
        (None, _) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool":"extract_penalty",
                    "article": record.article_number,
                    "error":"PenaltyNotFound",
                    "hint":"Informe manual_penalty (kind, min_years, max_years) no arquivo do caso.",
                    "error_code": 4
                })
            );
            std::process::exit(4);
        }
    };
    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"extract_penalty",
            "article": record.article_number,
            "source": source,
            "penalty": penalty
        })
    );

    // 4) Adjustments; validate_case already resolved both factor lists
    let aggravating = match select_factors(default_aggravating(), &case.aggravating) {
        Ok(t) => enabled_adjustments(&t),
        Err(e) => {
            eprintln!("{}", serde_json::json!({"tool":"select_factors","list":"aggravating","error":e.to_string(),"error_code":3}));
            std::process::exit(3);
        }
    };
    let mitigating = match select_factors(default_mitigating(), &case.mitigating) {
        Ok(t) => enabled_adjustments(&t),
        Err(e) => {
            eprintln!("{}", serde_json::json!({"tool":"select_factors","list":"mitigating","error":e.to_string(),"error_code":3}));
            std::process::exit(3);
        }
    };
    let (causes, cause_errors) = parse_adjustment_lines(&case.causes);
    for e in &cause_errors {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"parse_causes",
                "warning":"AdjustmentParseFailure",
                "detail": e.to_string()
            })
        );
    }

    let sentence_case = SentenceCase {
        percentile: case.percentile(),
        judicial_factor: case.judicial_factor,
        judicial_circumstances: case.judicial_circumstances.clone(),
        aggravating,
        mitigating,
        causes,
    };

    // 5) Three phases + report
    let report = build_report(&record.article_number, &penalty, source, &sentence_case);
    for w in &report.warnings {
        eprintln!(
            "{}",
            serde_json::json!({
                "tool":"compute_sentence",
                "warning": w
            })
        );
    }
    eprintln!(
        "{}",
        serde_json::json!({
            "tool":"compute_sentence",
            "article": report.article,
            "result": report.result
        })
    );

    let stem = format!("art-{}", slugify(&report.article));
    match emit_report(&report, &outdir, &stem) {
        Ok(paths) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool":"emit_report",
                    "md_path": paths.md_path,
                    "report_path": paths.report_path
                })
            );
            println!(
                "Pena definitiva: {:.3} anos ({} dias)",
                report.result.final_years, report.result.final_days
            );
        }
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "tool":"emit_report",
                    "error": e.to_string(),
                    "error_code": 6
                })
            );
            std::process::exit(6);
        }
    }
}
