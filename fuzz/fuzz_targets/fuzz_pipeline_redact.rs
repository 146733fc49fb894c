#![no_main]

use anonamoose::config::{ConfigSnapshot, Settings};
use anonamoose::pipeline::Pipeline;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    rt.block_on(async {
        let pipeline = Pipeline::new(&[], &[]);
        let snapshot = ConfigSnapshot::new(Settings::default());
        let result = pipeline.redact(data, &snapshot, &[]).await;
        // Every minted token must actually appear in the sanitized text, and
        // no binding's original text should survive redaction verbatim.
        for binding in &result.bindings {
            assert!(result.sanitized.contains(&binding.token));
        }
    });
});
