//! Wall clock bookkeeping and the statistics tables printed at the end of a solve.
use log::info;
use std::time::{Duration, Instant};
use tabled::{builder::Builder, settings::Style};

/// Human readable elapsed time, also logged.
pub fn elapsed_time(elapsed: Duration) -> (String, f64) {
    let time = elapsed.as_millis();
    if time < 1000 {
        info!("Elapsed {} ms", time);
        (" ms".to_string(), time as f64)
    } else if time < 60_000 {
        info!("Elapsed {:.3} s", elapsed.as_secs_f64());
        (" s".to_string(), elapsed.as_secs_f64())
    } else if time < 3_600_000 {
        info!("Elapsed {:.2} min", elapsed.as_secs_f64() / 60.0);
        (" min".to_string(), elapsed.as_secs_f64() / 60.0)
    } else {
        info!("Elapsed {:.2} h", elapsed.as_secs_f64() / 3600.0);
        (" h".to_string(), elapsed.as_secs_f64() / 3600.0)
    }
}

/// Accumulated time per phase of a solve: problem transcription, NLP iterations and
/// solution extraction.
#[derive(Debug, Clone)]
pub struct SolveTimer {
    pub start: Instant,
    pub transcription_time: Instant,
    pub transcription: Duration,
    pub nlp_time: Instant,
    pub nlp: Duration,
    pub extraction_time: Instant,
    pub extraction: Duration,
}

impl SolveTimer {
    pub fn new() -> SolveTimer {
        SolveTimer {
            start: Instant::now(),
            transcription_time: Instant::now(),
            transcription: Duration::ZERO,
            nlp_time: Instant::now(),
            nlp: Duration::ZERO,
            extraction_time: Instant::now(),
            extraction: Duration::ZERO,
        }
    }
    pub fn transcription_tic(&mut self) {
        self.transcription_time = Instant::now();
    }
    pub fn transcription_tac(&mut self) {
        self.transcription += self.transcription_time.elapsed();
    }
    pub fn nlp_tic(&mut self) {
        self.nlp_time = Instant::now();
    }
    pub fn nlp_tac(&mut self) {
        self.nlp += self.nlp_time.elapsed();
    }
    pub fn extraction_tic(&mut self) {
        self.extraction_time = Instant::now();
    }
    pub fn extraction_tac(&mut self) {
        self.extraction += self.extraction_time.elapsed();
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// share of the total run per phase, as table rows
    pub fn rows(&self) -> Vec<(String, String)> {
        let total = self.total();
        let percent = |d: Duration| {
            if total.is_zero() {
                0.0
            } else {
                100.0 * d.as_secs_f64() / total.as_secs_f64()
            }
        };
        let (unit, value) = elapsed_time(total);
        vec![
            ("total time".to_string(), format!("{:.3}{}", value, unit)),
            (
                "transcription, %".to_string(),
                format!("{:.1}", percent(self.transcription)),
            ),
            ("NLP solve, %".to_string(), format!("{:.1}", percent(self.nlp))),
            (
                "solution extraction, %".to_string(),
                format!("{:.1}", percent(self.extraction)),
            ),
        ]
    }
}

impl Default for SolveTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Two column key/value table in the rounded style used for all solver statistics.
pub fn key_value_table(rows: &[(String, String)]) -> String {
    let mut builder = Builder::default();
    for (key, value) in rows {
        builder.push_record([key.clone(), value.clone()]);
    }
    let mut table = builder.build();
    table.with(Style::modern_rounded());
    table.to_string()
}

/// Table with a header row.
pub fn records_table(header: &[&str], records: &[Vec<String>]) -> String {
    let mut builder = Builder::default();
    builder.push_record(header.iter().map(|h| h.to_string()));
    for record in records {
        builder.push_record(record.iter().cloned());
    }
    let mut table = builder.build();
    table.with(Style::modern_rounded());
    table.to_string()
}
