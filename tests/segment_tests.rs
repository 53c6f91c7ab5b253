use dosimetria::{index_articles, segment};

const CODE_SAMPLE: &str = "CÓDIGO PENAL\nPARTE ESPECIAL\n\
Art. 121. Matar alguém:\nPena - reclusão, de 6 a 20 anos.\n\n\
Art. 129. Ofender a integridade corporal ou a saúde de outrem:\nPena - detenção, de 3 meses a 1 ano.\n\n\
Artigo 130 Expor alguém a contágio de moléstia venérea:\nPena - detenção, de 3 (três) meses a 1 (um) ano, ou multa.\n\n\
Art. 131 (Revogado)\n";

#[test]
fn splits_one_snippet_per_marker() {
    let parts = segment(CODE_SAMPLE);
    let numbers: Vec<&str> = parts.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(numbers, vec!["121", "129", "130", "131"]);
    assert_eq!(parts[0].1, "Art. 121. Matar alguém:\nPena - reclusão, de 6 a 20 anos.");
    assert!(parts[2].1.starts_with("Artigo 130"));
    // last snippet runs to end-of-text, trimmed
    assert_eq!(parts[3].1, "Art. 131 (Revogado)");
}

#[test]
fn text_without_markers_is_empty_not_error() {
    assert!(segment("Nenhum dispositivo aqui.\nApenas texto.").is_empty());
    assert!(segment("").is_empty());
    assert!(index_articles("Nenhum dispositivo aqui.").is_empty());
}

#[test]
fn markers_are_case_insensitive() {
    let parts = segment("ARTIGO 7 texto sete art.8 texto oito ART . 9 nove");
    let numbers: Vec<&str> = parts.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(numbers, vec!["7", "8"]);
    assert_eq!(parts[1].1, "art.8 texto oito ART . 9 nove");
}

#[test]
fn plural_and_embedded_words_are_not_markers() {
    assert!(segment("Os Artigos 12 e 13 tratam do tema.").is_empty());
    assert!(segment("Smart. 5 não é artigo").is_empty());
}

#[test]
fn segmentation_is_deterministic() {
    assert_eq!(segment(CODE_SAMPLE), segment(CODE_SAMPLE));
    assert_eq!(index_articles(CODE_SAMPLE), index_articles(CODE_SAMPLE));
}

#[test]
fn duplicate_numbers_keep_last_snippet_in_first_position() {
    let text = "Art. 5 primeira redação\nArt. 6 outro\nArt. 5 segunda redação";
    assert_eq!(segment(text).len(), 3);

    let index = index_articles(text);
    assert_eq!(index.len(), 2);
    assert_eq!(index.numbers(), vec!["5", "6"]);
    assert_eq!(index.get("5").unwrap().snippet, "Art. 5 segunda redação");
    assert_eq!(index.replaced(), &["5".to_string()]);
}

#[test]
fn index_attaches_penalties() {
    let index = index_articles(CODE_SAMPLE);
    assert_eq!(index.len(), 4);

    let homicide = index.get("121").unwrap().penalty.as_ref().unwrap();
    assert!((homicide.min_years - 6.0).abs() < 1e-9);
    assert!((homicide.max_years - 20.0).abs() < 1e-9);

    let injury = index.get("129").unwrap().penalty.as_ref().unwrap();
    assert!((injury.min_years - 0.25).abs() < 1e-9);
    assert!((injury.max_years - 1.0).abs() < 1e-9);

    let contagion = index.get("130").unwrap().penalty.as_ref().unwrap();
    assert!((contagion.min_years - 0.25).abs() < 1e-9);

    assert!(index.get("131").unwrap().penalty.is_none());
    assert!(index.get("999").is_none());
}
