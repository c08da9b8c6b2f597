#![no_main]

use libfuzzer_sys::fuzz_target;
use srt_client::{
    build_generate_request, build_selection_request, ImageAttachment, OutputDtype,
    OutputFormatting, ProgramState, PromptInput, SamplingParams, SrtErrorKind,
};

fuzz_target!(|data: &[u8]| {
    let Some((&flags, rest)) = data.split_first() else {
        return;
    };
    let raw = String::from_utf8_lossy(rest);
    let image_count = usize::from(flags % 3);
    let mut state = ProgramState::new(raw.as_ref());
    for index in 0..image_count {
        state = state.with_image(ImageAttachment::new(format!("{index}.png"), "AAAA"));
    }
    let params = SamplingParams {
        dtype: (flags & 0x04 != 0).then_some(OutputDtype::Int),
        ..SamplingParams::default()
    };

    match build_generate_request(&state, &params, &OutputFormatting::default()) {
        Ok(request) => {
            assert!(image_count <= 1);
            assert_eq!(request.text, PromptInput::Single(raw.to_string()));
            assert_eq!(request.sampling_params.dtype, params.dtype);
            assert_eq!(request.image_data.is_some(), image_count == 1);
            assert!(!request.stream);
            assert!(request.streaming().stream);
        }
        Err(error) => {
            assert!(image_count > 1);
            assert_eq!(error.kind(), SrtErrorKind::Usage);
        }
    }

    let choices: Vec<String> = raw.split('|').map(str::to_string).collect();
    let prompt_tokens = u64::from(flags >> 4);
    match build_selection_request(&state, &choices, prompt_tokens) {
        Ok(request) => {
            let PromptInput::Batch(texts) = request.text else {
                panic!("selection must batch its choices");
            };
            assert_eq!(texts.len(), choices.len());
            assert_eq!(request.return_logprob, Some(true));
            assert_eq!(
                request.logprob_start_len,
                Some(prompt_tokens.saturating_sub(2) as i64)
            );
            assert_eq!(request.sampling_params.max_new_tokens, Some(0));
        }
        Err(error) => {
            assert!(image_count > 1);
            assert_eq!(error.kind(), SrtErrorKind::Usage);
        }
    }
});
