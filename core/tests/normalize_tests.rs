use booksdb::normalize::{normalize, split_words};

#[test]
fn normalization_is_idempotent() {
    let samples = [
        "Społeczna",
        "ODPOWIEDZIALNOŚĆ",
        "Zażółć gęślą jaźń",
        "Café",
        "S\u{301}WIAT",
        "İstanbul",
        "ǅemal",
        "Ωmega",
        "",
        "1984",
        "\u{141}\u{301}",
        "\u{f3}\u{301}",
        "\u{104}\u{301}\u{301}",
        "Z\u{307}\u{301}",
        "I\u{307}",
    ];
    for s in samples {
        let once = normalize(s);
        let twice = normalize(once.as_str());
        assert_eq!(once, twice, "not idempotent for {s:?}");
    }
}

#[test]
fn it_lowercases_and_folds_words_of_a_title() {
    let words: Vec<String> = split_words("Społeczna  Odpowiedzialność Biznesu")
        .into_iter()
        .map(|w| w.as_str().to_string())
        .collect();
    assert_eq!(words, ["spoleczna", "odpowiedzialnosc", "biznesu"]);
}
