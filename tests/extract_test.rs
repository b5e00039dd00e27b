use promptnodes::extract::{Extractor, ExtractorConfig, FieldSpec, Strategy};

fn wrap(tag: &str, body: &str) -> String {
    format!("<{tag}>{body}</{tag}>")
}

#[test]
fn unstructured_text_yields_empty_fields() {
    let extractors = [
        Extractor::prompt_pair(),
        Extractor::sd_prompt_pair(),
        Extractor::tagged_output(),
        Extractor::clip_sections(),
    ];
    for text in ["", "just a sentence about a cat", "<outpu>not quite</outpu>", "：：：", "🌙🌙"] {
        for extractor in &extractors {
            let found = extractor.extract(text);
            assert!(found.iter().all(|(_, value)| value.is_empty()), "{text:?} produced {found:?}");
            assert_eq!(found.applied(), None);
        }
    }
}

#[test]
fn numbered_labelled_output_is_stripped() {
    let found = Extractor::tagged_output().extract("<output>1. Label: hello world</output>");
    assert_eq!(found.get("output"), "hello world");
}

#[test]
fn cleaning_an_already_clean_block_changes_nothing() {
    let answer = wrap(
        "output",
        "\n1. Role: a watercolour painter who loves harbours\n\
         2. Scene: fishing boats at dawn with gulls overhead and mist on the water, soft light\n\
         - keep the palette muted\n\
         > sign the corner\n",
    );
    let extractor = Extractor::tagged_output();
    let once = extractor.extract(&answer).get("output").to_string();
    assert!(!once.is_empty());
    let twice = extractor.extract(&wrap("output", &once)).get("output").to_string();
    assert_eq!(once, twice);
}

#[test]
fn marker_delimited_fields_are_recovered() {
    let cases = [
        ("a lighthouse at dusk, oil painting", "blurry, watermark"),
        ("一只在雪地里的红狐狸，电影光效", "低质量，模糊"),
        ("line one\nline two", "single"),
    ];
    for (positive, negative) in cases {
        let text = format!("**Positive Prompt:** {positive}\n\n**Negative Prompt:** {negative}\n");
        let found = Extractor::prompt_pair().extract(&text);
        assert_eq!(found.get("positive"), positive);
        assert_eq!(found.get("negative"), negative);
    }
}

#[test]
fn custom_fields_keep_their_declared_order() {
    let extractor = Extractor::new(
        ExtractorConfig::new(vec![
            FieldSpec::marked("title", &["Title:"]),
            FieldSpec::marked("mood", &["Mood:", "Feeling:"]),
        ])
        .with_strategy(Strategy::Marker),
    );
    let found = extractor.extract("Feeling: calm\nTitle: Harbour");
    let names: Vec<&str> = found.iter().map(|(name, _)| name).collect();
    assert_eq!(names, ["title", "mood"]);
    assert_eq!(found.get("title"), "Harbour");
    assert_eq!(found.get("mood"), "calm");
}
