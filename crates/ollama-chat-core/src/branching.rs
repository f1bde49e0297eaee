//! Sibling answers: alternate replies kept for the same user turn

use crate::error::{ChatError, Result};
use crate::state::{AnswerSlot, ChatMessage};

/// Check that `index` is an assistant answer directly following a user turn
pub fn answer_at(messages: &[ChatMessage], index: usize) -> Result<&ChatMessage> {
    match (index.checked_sub(1).and_then(|i| messages.get(i)), messages.get(index)) {
        (Some(prev), Some(msg)) if prev.is_user() && msg.is_assistant() => Ok(msg),
        _ => Err(ChatError::NotAnAnswer(index)),
    }
}

/// Append an empty sibling to the answer at `index` and select it
pub fn add_sibling(messages: &mut [ChatMessage], index: usize) -> Result<AnswerSlot> {
    answer_at(messages, index)?;
    let answer = messages[index].push_sibling();
    Ok(AnswerSlot {
        message: index,
        answer,
    })
}

pub fn can_go_next(messages: &[ChatMessage], index: usize) -> bool {
    answer_at(messages, index)
        .map(|msg| msg.selected + 1 < msg.sibling_count())
        .unwrap_or(false)
}

pub fn can_go_previous(messages: &[ChatMessage], index: usize) -> bool {
    answer_at(messages, index)
        .map(|msg| msg.selected > 0)
        .unwrap_or(false)
}

/// Show the next sibling. Returns false at the last one.
pub fn next_answer(messages: &mut [ChatMessage], index: usize) -> Result<bool> {
    answer_at(messages, index)?;
    if !can_go_next(messages, index) {
        return Ok(false);
    }
    let msg = &mut messages[index];
    msg.select_answer(msg.selected + 1);
    Ok(true)
}

/// Show the previous sibling. Returns false at the first one.
pub fn previous_answer(messages: &mut [ChatMessage], index: usize) -> Result<bool> {
    answer_at(messages, index)?;
    if !can_go_previous(messages, index) {
        return Ok(false);
    }
    let msg = &mut messages[index];
    msg.select_answer(msg.selected - 1);
    Ok(true)
}

/// Remove the user turn at `index` together with its answer.
/// Returns how many messages were removed.
pub fn delete_turn(messages: &mut Vec<ChatMessage>, index: usize) -> Result<usize> {
    match messages.get(index) {
        Some(msg) if msg.is_user() => {}
        _ => return Err(ChatError::NotAUserTurn(index)),
    }

    let end = match messages.get(index + 1) {
        Some(next) if next.is_assistant() => index + 2,
        _ => index + 1,
    };
    messages.drain(index..end);
    Ok(end - index)
}
