use dosimetria::{
    default_aggravating, default_mitigating, enabled_adjustments, parse_adjustment_line, parse_adjustment_lines,
    select_factors, Adjustment, AdjustmentParseError, FactorSelection,
};

#[test]
fn parses_label_percent_lines_and_reports_bad_ones() {
    let text = "Uso de arma|0.50\n\nArrependimento eficaz|-0,5\nsem separador\n|0.1\nConcurso|abc\nConcurso formal|0.1667";
    let (adjs, errors) = parse_adjustment_lines(text);
    assert_eq!(
        adjs,
        vec![
            Adjustment::new("Uso de arma", 0.50),
            Adjustment::new("Arrependimento eficaz", -0.5),
            Adjustment::new("Concurso formal", 0.1667),
        ]
    );
    assert_eq!(errors.len(), 3);
    assert!(matches!(errors[0], AdjustmentParseError::MissingSeparator { line: 4, .. }));
    assert!(matches!(errors[1], AdjustmentParseError::EmptyLabel { line: 5, .. }));
    assert!(matches!(errors[2], AdjustmentParseError::InvalidPercent { line: 6, .. }));
}

#[test]
fn only_first_separator_splits() {
    let adj = parse_adjustment_line(1, "Causa|especial|0.2");
    assert!(matches!(adj, Err(AdjustmentParseError::InvalidPercent { .. })));
    let adj = parse_adjustment_line(1, "  Tentativa | -0.3333 ").unwrap();
    assert_eq!(adj, Adjustment::new("Tentativa", -0.3333));
}

#[test]
fn non_finite_percent_is_rejected() {
    assert!(parse_adjustment_line(1, "x|inf").is_err());
    assert!(parse_adjustment_line(1, "x|NaN").is_err());
}

#[test]
fn catalog_starts_disabled() {
    assert!(enabled_adjustments(&default_aggravating()).is_empty());
    assert!(enabled_adjustments(&default_mitigating()).is_empty());
    assert!(default_aggravating().iter().all(|t| t.default_percent > 0.0));
    assert!(default_mitigating().iter().all(|t| t.default_percent < 0.0));
}

#[test]
fn selecting_factors_uses_defaults_overrides_and_custom_entries() {
    let selections = vec![
        FactorSelection { label: "Reincidência (art.63)".into(), percent: None },
        FactorSelection { label: "abuso de poder (art.61 II g)".into(), percent: Some(0.10) },
        FactorSelection { label: "agravante específica".into(), percent: Some(0.05) },
    ];
    let toggles = select_factors(default_aggravating(), &selections).unwrap();
    assert_eq!(
        enabled_adjustments(&toggles),
        vec![
            Adjustment::new("reincidência (art.63)", 0.20),
            Adjustment::new("abuso de poder (art.61 II g)", 0.10),
            Adjustment::new("agravante específica", 0.05),
        ]
    );
}

#[test]
fn unknown_factor_without_percent_is_rejected() {
    let selections = vec![FactorSelection { label: "inexistente".into(), percent: None }];
    assert!(select_factors(default_mitigating(), &selections).is_err());
}
