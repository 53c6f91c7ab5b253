use std::fs;

use dosimetria::{
    build_report, emit_report, render_markdown, report_fingerprint, validate_case, Adjustment, CaseError,
    DocumentKind, PenaltyRange, PenaltySource, SentenceCase,
};

fn write_case(dir: &std::path::Path, yaml: &str) -> std::path::PathBuf {
    let p = dir.join("case.yaml");
    fs::write(&p, yaml).unwrap();
    p
}

fn sample_case() -> SentenceCase {
    SentenceCase {
        percentile: 50,
        judicial_factor: 1.0,
        judicial_circumstances: vec!["antecedentes".into()],
        aggravating: vec![Adjustment::new("reincidência (art.63)", 0.20)],
        mitigating: vec![Adjustment::new("confissão espontânea (art.65 III d)", -0.20)],
        causes: vec![Adjustment::new("Uso de arma", 0.50)],
    }
}

#[test]
fn full_case_file_is_parsed_with_defaults() {
    let td = tempfile::tempdir().unwrap();
    let p = write_case(
        td.path(),
        r#"
document:
  path: codigo_penal.pdf
article: 155
manual_penalty:
  min_years: 1
  max_years: 4
aggravating:
  - label: "reincidência (art.63)"
mitigating:
  - label: "confissão espontânea (art.65 III d)"
    percent: -0.2
causes: |
  Uso de arma|0.50
"#,
    );
    let case = validate_case(&p).expect("valid case");
    assert_eq!(case.article, "155");
    assert_eq!(case.document_kind(), DocumentKind::Pdf);
    assert_eq!(case.percentile(), 50);
    assert_eq!(case.judicial_factor, 1.0);
    assert_eq!(case.output_dir(), "./output");
    let manual = case.manual_range().unwrap().unwrap();
    assert_eq!(manual.kind, "reclusão");
    assert_eq!(manual.max_years, 4.0);
}

#[test]
fn explicit_kind_and_string_article() {
    let td = tempfile::tempdir().unwrap();
    let p = write_case(
        td.path(),
        "document:\n  path: codigo\n  kind: txt\narticle: \"121\"\npercentile: 0\noutput:\n  dir: ./out\n",
    );
    let case = validate_case(&p).unwrap();
    assert_eq!(case.document_kind(), DocumentKind::Text);
    assert_eq!(case.article, "121");
    assert_eq!(case.output_dir(), "./out");
    assert!(case.manual_range().is_none());
}

#[test]
fn judicial_circumstances_match_the_catalog_ignoring_case() {
    let td = tempfile::tempdir().unwrap();
    let p = write_case(
        td.path(),
        "document:\n  path: a.txt\narticle: 1\njudicial_circumstances: [Antecedentes, \" conduta social \", MOTIVOS]\n",
    );
    let case = validate_case(&p).unwrap();
    assert_eq!(case.judicial_circumstances.len(), 3);
    assert_eq!(case.judicial_circumstances[0], "Antecedentes");
}

#[test]
fn invalid_cases_are_rejected() {
    let td = tempfile::tempdir().unwrap();
    let cases = [
        "document:\n  path: a.txt\narticle: 1\npercentile: 101\n",
        "document:\n  path: a.txt\narticle: 1\njudicial_factor: -1\n",
        "document:\n  path: \"\"\narticle: 1\n",
        "document:\n  path: a.txt\narticle: 1\nmanual_penalty:\n  min_years: 5\n  max_years: 1\n",
        "document:\n  path: a.txt\narticle: 1\naggravating:\n  - label: inventada\n",
        "document:\n  path: a.txt\narticle: 1\njudicial_circumstances: [antecedentes, sorte]\n",
    ];
    for yaml in cases {
        let p = write_case(td.path(), yaml);
        assert!(matches!(validate_case(&p), Err(CaseError::Invalid(_))), "should be invalid: {}", yaml);
    }

    let p = write_case(td.path(), "article: [1, 2]\n");
    assert!(matches!(validate_case(&p), Err(CaseError::Parse(_))));
    assert!(matches!(validate_case(&td.path().join("missing.yaml")), Err(CaseError::Read(_))));
}

#[test]
fn report_follows_three_phases() {
    let penalty = PenaltyRange::manual("reclusão", 1.0, 4.0).unwrap();
    let report = build_report("155", &penalty, PenaltySource::Manual, &sample_case());
    assert_eq!(report.result.base_years, 2.5);
    assert_eq!(report.result.provisional_years, 2.4);
    assert_eq!(report.result.final_years, 3.6);
    assert_eq!(report.result.final_days, 1314);
    assert!(report.warnings.is_empty());

    let md = render_markdown(&report);
    assert!(md.contains("Art. 155"));
    assert!(md.contains("Pena definitiva: **3.600 anos**"));
    assert!(md.contains("1314 dias"));
    assert!(md.contains("- reincidência (art.63): +20%"));
    assert!(md.contains("informada manualmente"));
}

#[test]
fn out_of_range_values_are_warned_not_clamped() {
    let penalty = PenaltyRange::manual("detenção", 1.0, 2.0).unwrap();
    let case = SentenceCase {
        percentile: 100,
        judicial_factor: 2.0,
        causes: vec![Adjustment::new("redução total", -1.5)],
        ..SentenceCase::default()
    };
    let report = build_report("1", &penalty, PenaltySource::Extracted, &case);
    assert_eq!(report.result.base_years, 4.0);
    assert_eq!(report.result.final_years, -2.0);
    assert_eq!(report.warnings.len(), 2);
}

#[test]
fn emit_writes_markdown_and_fingerprinted_json() {
    let penalty = PenaltyRange::manual("reclusão", 1.0, 4.0).unwrap();
    let report = build_report("155", &penalty, PenaltySource::Extracted, &sample_case());

    let td = tempfile::tempdir().unwrap();
    let outdir = td.path().join("out");
    let paths = emit_report(&report, outdir.to_str().unwrap(), "art-155").expect("emit ok");

    let md = fs::read_to_string(&paths.md_path).unwrap();
    assert_eq!(md, render_markdown(&report));

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&paths.report_path).unwrap()).unwrap();
    assert_eq!(json["article"], "155");
    assert_eq!(json["penalty_source"], "extracted");
    assert_eq!(json["result"]["final_days"], 1314);
    assert_eq!(json["report_fingerprint"], report_fingerprint(&report));
    assert!(json["generated_ms"].is_u64());
}

#[test]
fn fingerprint_is_stable_for_identical_inputs() {
    let penalty = PenaltyRange::manual("reclusão", 1.0, 4.0).unwrap();
    let a = build_report("155", &penalty, PenaltySource::Manual, &sample_case());
    let b = build_report("155", &penalty, PenaltySource::Manual, &sample_case());
    assert_eq!(report_fingerprint(&a), report_fingerprint(&b));

    let mut other = sample_case();
    other.percentile = 60;
    let c = build_report("155", &penalty, PenaltySource::Manual, &other);
    assert_ne!(report_fingerprint(&a), report_fingerprint(&c));
}
