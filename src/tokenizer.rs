//! Lexical analysis: splits a source file into whitespace-separated words.
//!
//! Tinka has no punctuation, so the lexer only knows two things besides
//! whitespace: `--` starts a comment that runs to the end of the line, and a
//! lone `-` is literal and swallows the character after it. The latter keeps
//! hyphenated words in one piece without mistaking them for a comment. The
//! lexer cannot fail.

/// A word of source text together with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
  pub text: String,
  pub loc: usize,
}

impl Word {
  pub fn new(text: impl Into<String>, loc: usize) -> Self {
    Self {
      text: text.into(),
      loc,
    }
  }
}

/// Split `input` into words, dropping comments.
pub fn tokenize(input: &str) -> Vec<Word> {
  let mut words = Vec::new();
  let mut pending = String::new();
  let mut start = 0;
  let mut chars = input.char_indices();

  while let Some((i, c)) = chars.next() {
    if c == '-' {
      let Some((_, next)) = chars.next() else {
        break;
      };
      if next == '-' {
        flush(&mut words, &mut pending, start);
        for (_, c) in chars.by_ref() {
          if c == '\n' || c == '\r' {
            break;
          }
        }
      } else {
        if pending.is_empty() {
          start = i;
        }
        pending.push('-');
        pending.push(next);
      }
    } else if c.is_whitespace() {
      flush(&mut words, &mut pending, start);
    } else {
      if pending.is_empty() {
        start = i;
      }
      pending.push(c);
    }
  }

  flush(&mut words, &mut pending, start);
  words
}

fn flush(words: &mut Vec<Word>, pending: &mut String, loc: usize) {
  if !pending.is_empty() {
    words.push(Word::new(std::mem::take(pending), loc));
  }
}

/// Human-friendly description used in diagnostics.
pub fn describe_word(word: Option<&Word>) -> String {
  match word {
    Some(w) => w.text.clone(),
    None => "EOF".to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn texts(input: &str) -> Vec<String> {
    tokenize(input).into_iter().map(|w| w.text).collect()
  }

  #[test]
  fn splits_on_any_whitespace() {
    assert_eq!(
      texts("cersva  f\trinyv\n\u{3000}situv"),
      ["cersva", "f", "rinyv", "situv"]
    );
  }

  #[test]
  fn strips_line_comments() {
    let source = "anax x -- declare x\nkrz 1 x--trailing\r\nsituv";
    assert_eq!(texts(source), ["anax", "x", "krz", "1", "x", "situv"]);
  }

  #[test]
  fn comment_at_end_of_input() {
    assert_eq!(texts("dosnud 0 -- done"), ["dosnud", "0"]);
  }

  #[test]
  fn single_dash_is_literal() {
    assert_eq!(texts("fal-rinyv -1 a-b-c"), ["fal-rinyv", "-1", "a-b-c"]);
  }

  #[test]
  fn dash_swallows_following_whitespace() {
    assert_eq!(texts("a - b"), ["a", "- b"]);
  }

  #[test]
  fn trailing_dash_ends_stream() {
    assert_eq!(texts("situv x-"), ["situv", "x"]);
  }

  #[test]
  fn records_word_offsets() {
    let words = tokenize("  kue  main");
    assert_eq!(words, [Word::new("kue", 2), Word::new("main", 7)]);
  }

  #[test]
  fn records_offset_of_dash_words() {
    let words = tokenize("x -1");
    assert_eq!(words[1], Word::new("-1", 2));
  }

  #[test]
  fn empty_and_comment_only_input() {
    assert!(tokenize("").is_empty());
    assert!(tokenize("-- nothing here\n   \n--").is_empty());
  }

  #[test]
  fn describes_missing_word_as_eof() {
    assert_eq!(describe_word(None), "EOF");
    assert_eq!(describe_word(Some(&Word::new("el", 0))), "el");
  }

  proptest! {
    #[test]
    fn never_produces_empty_words(input in "\\PC*") {
      prop_assert!(tokenize(&input).iter().all(|w| !w.text.is_empty()));
    }

    #[test]
    fn dash_free_input_splits_like_whitespace(input in "[a-z0-9@ \t\n]*") {
      let expected: Vec<String> = input.split_whitespace().map(str::to_string).collect();
      prop_assert_eq!(texts(&input), expected);
    }

    #[test]
    fn offsets_point_at_word_start(input in "[a-z@ \n-]*") {
      for word in tokenize(&input) {
        let first = word.text.chars().next().unwrap();
        prop_assert!(input[word.loc..].starts_with(first));
      }
    }
  }
}
