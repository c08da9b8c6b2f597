use crate::{Generation, Selection, SrtClientError};

/// Index of the highest score; ties keep the earliest index, NaN never wins
/// over a comparable score.
pub fn argmax_first(scores: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, score) in scores.iter().enumerate() {
        best = match best {
            None => Some(index),
            Some(current) if scores[current].is_nan() && !score.is_nan() => Some(index),
            Some(current) if *score > scores[current] => Some(index),
            keep => keep,
        };
    }
    best
}

/// Turns the batched scoring response into a [`Selection`] over `choices`.
pub fn score_choices(
    choices: &[String],
    scored: Vec<Generation>,
) -> Result<Selection, SrtClientError> {
    if scored.len() != choices.len() {
        return Err(SrtClientError::InvalidResponse(format!(
            "scoring response has {} entries for {} choices",
            scored.len(),
            choices.len()
        )));
    }

    let mut normalized_prompt_logprobs = Vec::with_capacity(scored.len());
    let mut input_token_logprobs = Vec::with_capacity(scored.len());
    let mut output_token_logprobs = Vec::with_capacity(scored.len());
    for (index, generation) in scored.into_iter().enumerate() {
        let meta = generation.meta_info;
        let score = meta.normalized_prompt_logprob.ok_or_else(|| {
            SrtClientError::InvalidResponse(format!(
                "choice {index} is missing meta_info.normalized_prompt_logprob"
            ))
        })?;
        normalized_prompt_logprobs.push(score);
        input_token_logprobs.push(meta.input_token_logprobs.unwrap_or_default());
        output_token_logprobs.push(meta.output_token_logprobs.unwrap_or_default());
    }

    let index = argmax_first(&normalized_prompt_logprobs).ok_or_else(|| {
        SrtClientError::Usage("select requires at least one choice".to_string())
    })?;
    Ok(Selection {
        decision: choices[index].clone(),
        index,
        normalized_prompt_logprobs,
        input_token_logprobs,
        output_token_logprobs,
    })
}
