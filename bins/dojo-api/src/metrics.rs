// Prometheus metrics for the grading service

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, Encoder,
    HistogramVec, IntCounterVec, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    /// Validations by language and verdict (`correct` / `incorrect`)
    pub validations_total: IntCounterVec,
    pub validation_seconds: HistogramVec,
    /// Interactive runs by language and outcome (`ok` / `error` / `timeout`)
    pub runs_total: IntCounterVec,
    registry: Registry,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let validations_total = register_int_counter_vec_with_registry!(
            "dojo_validations_total",
            "Submissions graded, by language and verdict",
            &["language", "verdict"],
            registry
        )?;

        let validation_seconds = register_histogram_vec_with_registry!(
            "dojo_validation_seconds",
            "Wall-clock time to grade one submission",
            &["language"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0],
            registry
        )?;

        let runs_total = register_int_counter_vec_with_registry!(
            "dojo_runs_total",
            "Interactive runs, by language and outcome",
            &["language", "outcome"],
            registry
        )?;

        Ok(Self {
            validations_total,
            validation_seconds,
            runs_total,
            registry,
        })
    }

    pub fn record_validation(&self, language: &str, is_correct: bool, seconds: f64) {
        let verdict = if is_correct { "correct" } else { "incorrect" };
        self.validations_total
            .with_label_values(&[language, verdict])
            .inc();
        self.validation_seconds
            .with_label_values(&[language])
            .observe(seconds);
    }

    pub fn record_run(&self, language: &str, success: bool, timed_out: bool) {
        let outcome = match (success, timed_out) {
            (_, true) => "timeout",
            (true, false) => "ok",
            (false, false) => "error",
        };
        self.runs_total.with_label_values(&[language, outcome]).inc();
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
