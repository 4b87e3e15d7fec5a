//! Dialogue shaping: split a reply into sentences and pick the avatar's
//! animation and facial expression from simple keyword cues.

use rand::seq::SliceRandom;
use serde::Serialize;

/// Animation for every message after the first.
pub const FOLLOW_UP_ANIMATION: &str = "Talking";

const TALKING_ANIMATIONS: [&str; 3] = ["TalkingOne", "TalkingTwo", "Talking"];
const DEFAULT_EXPRESSIONS: [&str; 3] = ["smile", "default", "funnyFace"];

/// One sentence of a reply, ready to be voiced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueMessage {
    pub text: String,
    pub facial_expression: String,
    pub animation: String,
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Split `text` into sentences.
///
/// A sentence is a run of non-terminators followed by one or more of `.`, `!`,
/// `?` and then whitespace or the end of the text; an unterminated tail also
/// counts. Text that yields no sentence at all is returned whole.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut found: Vec<String> = Vec::new();
    let mut i = 0;

    while i < len {
        let body_end = (i..len).find(|&j| is_terminator(chars[j])).unwrap_or(len);
        if body_end == i {
            i += 1;
            continue;
        }
        if body_end == len {
            // Unterminated tail.
            found.push(chars[i..].iter().collect());
            break;
        }
        let stop_end = (body_end..len)
            .find(|&j| !is_terminator(chars[j]))
            .unwrap_or(len);
        if stop_end == len || chars[stop_end].is_whitespace() {
            found.push(chars[i..stop_end].iter().collect());
            i = stop_end;
        } else {
            // Terminators glued to the next word ("3.5", "e.g.x") do not end a
            // sentence here; retry from the next character.
            i += 1;
        }
    }

    if found.is_empty() {
        found.push(text.to_string());
    }
    found
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Animation for the first sentence of a reply.
pub fn select_animation(text: &str) -> String {
    let lower = text.to_lowercase();
    if contains_any(&lower, &["happy", "great", "wonderful"]) {
        return "HappyIdle".to_string();
    }
    if contains_any(&lower, &["sad", "sorry", "unfortunate"]) {
        return "SadIdle".to_string();
    }
    if contains_any(&lower, &["angry", "upset"]) {
        return "Angry".to_string();
    }
    if contains_any(&lower, &["surprised", "wow", "amazing"]) {
        return "Surprised".to_string();
    }
    pick(&TALKING_ANIMATIONS)
}

/// Facial expression held across the whole reply.
pub fn select_facial_expression(text: &str) -> String {
    let lower = text.to_lowercase();
    if contains_any(&lower, &["happy", "great", "wonderful"]) {
        return "smile".to_string();
    }
    if contains_any(&lower, &["sad", "sorry"]) {
        return "sad".to_string();
    }
    if contains_any(&lower, &["angry", "upset"]) {
        return "angry".to_string();
    }
    if contains_any(&lower, &["surprised", "wow"]) {
        return "surprised".to_string();
    }
    if contains_any(&lower, &["crazy", "wild"]) {
        return "crazy".to_string();
    }
    pick(&DEFAULT_EXPRESSIONS)
}

fn pick(options: &[&str]) -> String {
    options
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FOLLOW_UP_ANIMATION)
        .to_string()
}

/// Shape a full reply into per-sentence messages.
pub fn compose_messages(text: &str) -> Vec<DialogueMessage> {
    let animation = select_animation(text);
    let expression = select_facial_expression(text);
    split_sentences(text)
        .into_iter()
        .enumerate()
        .map(|(index, sentence)| DialogueMessage {
            text: sentence,
            facial_expression: expression.clone(),
            animation: if index == 0 {
                animation.clone()
            } else {
                FOLLOW_UP_ANIMATION.to_string()
            },
        })
        .collect()
}
