//! The `gist` analyzer used for every text field of the embedded engine.
//!
//! Text is split into words on Unicode boundaries, each word is brought to
//! NFC, identifiers are split into their parts (`myVariableName` and
//! `my_variable_name` are both indexed as `my`, `variable`, `name`) and
//! everything is lowercased.

use std::collections::VecDeque;

use tantivy::{
    Index,
    tokenizer::{
        LowerCaser,
        TextAnalyzer,
        Token,
        TokenFilter,
        TokenStream,
        Tokenizer,
    },
};
use unicode_normalization::{UnicodeNormalization, is_nfc};
use unicode_segmentation::{UWordBoundIndices, UnicodeSegmentation};

/// Name under which the analyzer is registered on the index.
pub const GIST_TOKENIZER: &str = "gist";

pub fn gist_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(WordTokenizer::default())
        .filter(UnicodeNormalizer)
        .filter(CamelCaseSplitter)
        .filter(LowerCaser)
        .build()
}

pub fn register(index: &Index) {
    index.tokenizers().register(GIST_TOKENIZER, gist_analyzer());
}

/// Run `text` through the gist analyzer and return `(position, term)` pairs.
pub fn analyze(text: &str) -> Vec<(usize, String)> {
    let mut analyzer = gist_analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while stream.advance() {
        let token = stream.token();
        tokens.push((token.position, token.text.clone()));
    }
    tokens
}

/// Emits the UAX#29 words of the text that contain at least one
/// alphanumeric character. Apostrophes and decimal points inside a word
/// (`don't`, `3.14`) stay part of it.
#[derive(Clone, Default)]
pub struct WordTokenizer {
    token: Token,
}

pub struct WordTokenStream<'a> {
    words: UWordBoundIndices<'a>,
    token: &'a mut Token,
}

impl Tokenizer for WordTokenizer {
    type TokenStream<'a> = WordTokenStream<'a>;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> WordTokenStream<'a> {
        self.token.reset();
        WordTokenStream {
            words: text.split_word_bound_indices(),
            token: &mut self.token,
        }
    }
}

impl TokenStream for WordTokenStream<'_> {
    fn advance(&mut self) -> bool {
        self.token.text.clear();
        self.token.position = self.token.position.wrapping_add(1);
        for (offset_from, word) in self.words.by_ref() {
            if word.chars().any(char::is_alphanumeric) {
                self.token.offset_from = offset_from;
                self.token.offset_to = offset_from + word.len();
                self.token.text.push_str(word);
                return true;
            }
        }
        false
    }

    fn token(&self) -> &Token {
        self.token
    }

    fn token_mut(&mut self) -> &mut Token {
        self.token
    }
}

/// Rewrites each token to Unicode normalization form C.
#[derive(Clone)]
pub struct UnicodeNormalizer;

impl TokenFilter for UnicodeNormalizer {
    type Tokenizer<T: Tokenizer> = UnicodeNormalizerWrapper<T>;

    fn transform<T: Tokenizer>(self, tokenizer: T) -> Self::Tokenizer<T> {
        UnicodeNormalizerWrapper(tokenizer)
    }
}

#[derive(Clone)]
pub struct UnicodeNormalizerWrapper<T>(T);

impl<T: Tokenizer> Tokenizer for UnicodeNormalizerWrapper<T> {
    type TokenStream<'a> = UnicodeNormalizerTokenStream<T::TokenStream<'a>>;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        UnicodeNormalizerTokenStream(self.0.token_stream(text))
    }
}

pub struct UnicodeNormalizerTokenStream<T>(T);

impl<T: TokenStream> TokenStream for UnicodeNormalizerTokenStream<T> {
    fn advance(&mut self) -> bool {
        if !self.0.advance() {
            return false;
        }
        let token = self.0.token_mut();
        if !is_nfc(&token.text) {
            token.text = token.text.nfc().collect();
        }
        true
    }

    fn token(&self) -> &Token {
        self.0.token()
    }

    fn token_mut(&mut self) -> &mut Token {
        self.0.token_mut()
    }
}

/// Splits camel-case tokens into their parts and renumbers positions so
/// phrase queries see the parts as consecutive words.
#[derive(Clone)]
pub struct CamelCaseSplitter;

impl TokenFilter for CamelCaseSplitter {
    type Tokenizer<T: Tokenizer> = CamelCaseSplitterWrapper<T>;

    fn transform<T: Tokenizer>(self, tokenizer: T) -> Self::Tokenizer<T> {
        CamelCaseSplitterWrapper(tokenizer)
    }
}

#[derive(Clone)]
pub struct CamelCaseSplitterWrapper<T>(T);

impl<T: Tokenizer> Tokenizer for CamelCaseSplitterWrapper<T> {
    type TokenStream<'a> = CamelCaseTokenStream<T::TokenStream<'a>>;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        CamelCaseTokenStream {
            tail: self.0.token_stream(text),
            pending: VecDeque::new(),
            current: Token::default(),
            position: 0,
        }
    }
}

pub struct CamelCaseTokenStream<T> {
    tail: T,
    pending: VecDeque<Token>,
    current: Token,
    position: usize,
}

impl<T: TokenStream> CamelCaseTokenStream<T> {
    fn fill_pending(&mut self) -> bool {
        while self.pending.is_empty() {
            if !self.tail.advance() {
                return false;
            }
            let token = self.tail.token();
            for (from, to) in camel_case_bounds(&token.text) {
                self.pending.push_back(Token {
                    offset_from: (token.offset_from + from)
                        .min(token.offset_to),
                    offset_to: (token.offset_from + to).min(token.offset_to),
                    position: 0,
                    text: token.text[from..to].to_string(),
                    position_length: 1,
                });
            }
        }
        true
    }
}

impl<T: TokenStream> TokenStream for CamelCaseTokenStream<T> {
    fn advance(&mut self) -> bool {
        if !self.fill_pending() {
            return false;
        }
        match self.pending.pop_front() {
            Some(mut token) => {
                token.position = self.position;
                self.position += 1;
                self.current = token;
                true
            }
            None => false,
        }
    }

    fn token(&self) -> &Token {
        &self.current
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.current
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    Other,
}

fn class_of(c: char) -> CharClass {
    if c.is_lowercase() {
        CharClass::Lower
    } else if c.is_uppercase() {
        CharClass::Upper
    } else if c.is_numeric() {
        CharClass::Digit
    } else {
        CharClass::Other
    }
}

/// Underscores always separate parts; a period only does between letters,
/// so `main.go` splits but `3.14` does not.
fn is_separator(chars: &[(usize, char)], i: usize) -> bool {
    match chars[i].1 {
        '_' => true,
        '.' => {
            i > 0
                && chars[i - 1].1.is_alphabetic()
                && chars.get(i + 1).is_some_and(|&(_, c)| c.is_alphabetic())
        }
        _ => false,
    }
}

fn starts_part(chars: &[(usize, char)], i: usize) -> bool {
    match (class_of(chars[i - 1].1), class_of(chars[i].1)) {
        (CharClass::Other, _) | (_, CharClass::Other) => false,
        (CharClass::Upper, CharClass::Lower) => false,
        (CharClass::Upper, CharClass::Upper) => chars
            .get(i + 1)
            .is_some_and(|&(_, c)| class_of(c) == CharClass::Lower),
        (a, b) => a != b,
    }
}

/// Byte ranges of the identifier parts of `text`.
///
/// A new part starts at a lower-to-upper transition, before the last capital
/// of an acronym that is followed by a lowercase letter (`HTMLParser` gives
/// `HTML`, `Parser`), and wherever letters and digits meet. Punctuation kept
/// inside a word by segmentation (`don't`) never starts a part.
fn camel_case_bounds(text: &str) -> Vec<(usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut bounds = Vec::new();
    let mut start: Option<usize> = None;

    for i in 0..chars.len() {
        if is_separator(&chars, i) {
            if let Some(from) = start.take() {
                bounds.push((chars[from].0, chars[i].0));
            }
            continue;
        }
        match start {
            None => start = Some(i),
            Some(from) if starts_part(&chars, i) => {
                bounds.push((chars[from].0, chars[i].0));
                start = Some(i);
            }
            Some(_) => {}
        }
    }
    if let Some(from) = start {
        bounds.push((chars[from].0, text.len()));
    }

    bounds.retain(|&(from, to)| text[from..to].chars().any(char::is_alphanumeric));
    bounds
}
