// src/operator.rs
use std::io::{self, BufRead, Write};
use crate::drivers::source::{SharedBench, StimulusController, StimulusHandle, StimulusSettings};
use crate::drivers::ProdTestError;
use crate::types::TestMode;
/// The person at the bench: reads instructions, moves switches, types
/// readings.
pub trait Operator {
    fn notify(&mut self, message: &str);
    /// Free-text answer to `question`, without the trailing newline.
    fn prompt(&mut self, question: &str) -> Result<String, ProdTestError>;
    /// `Ok(false)` when the operator asks to quit.
    fn confirm(&mut self, question: &str) -> Result<bool, ProdTestError> {
        let answer = self.prompt(&format!("{question} [enter to continue, q to quit]"))?;
        Ok(answer.trim() != "q")
    }
    /// Asks for the board switch to be moved to `mode` before `channel` is
    /// measured.
    fn confirm_mode(&mut self, channel: usize, mode: TestMode) -> Result<bool, ProdTestError> {
        self.confirm(&format!(
            "Set the input switch to {} and connect channel {channel}",
            mode.switch_position()
        ))
    }
    /// Keeps asking until the answer parses as a number.
    fn read_value(&mut self, question: &str) -> Result<f64, ProdTestError> {
        loop {
            let answer = self.prompt(question)?;
            match answer.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => return Ok(v),
                _ => self.notify(&format!("{:?} is not a number", answer.trim())),
            }
        }
    }
}
/// Operator on the process's terminal.
#[derive(Default)]
pub struct ConsoleOperator;
impl ConsoleOperator {
    pub fn new() -> Self {
        Self
    }
}
impl Operator for ConsoleOperator {
    fn notify(&mut self, message: &str) {
        println!("{message}");
    }
    fn prompt(&mut self, question: &str) -> Result<String, ProdTestError> {
        print!("{question} ");
        io::stdout().flush()?;
        let mut line = String::new();
        // stdin is locked per read so several operators can share the terminal
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(ProdTestError::Aborted);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}
/// Replays canned answers and keeps a transcript.
#[cfg(test)]
#[derive(Default)]
pub struct ScriptedOperator {
    answers: std::collections::VecDeque<String>,
    transcript: Vec<String>,
}
#[cfg(test)]
impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }
}
#[cfg(test)]
impl Operator for ScriptedOperator {
    fn notify(&mut self, message: &str) {
        self.transcript.push(message.to_string());
    }
    fn prompt(&mut self, question: &str) -> Result<String, ProdTestError> {
        self.transcript.push(question.to_string());
        // running out of script behaves like a closed terminal
        self.answers.pop_front().ok_or(ProdTestError::Aborted)
    }
}
/// Operator for simulated runs: accepts every prompt and moves the bench's
/// input switch itself.
pub struct SimulatedOperator {
    bench: SharedBench,
    /// Input gain of the attenuated path.
    pub attenuation: f64,
    /// Answer `q` at this mode confirmation (zero-based), if set.
    pub quit_at: Option<usize>,
    confirmations: usize,
    transcript: Vec<String>,
}
impl SimulatedOperator {
    pub fn new(bench: SharedBench, attenuation: f64) -> Self {
        Self {
            bench,
            attenuation,
            quit_at: None,
            confirmations: 0,
            transcript: Vec::new(),
        }
    }
    #[cfg(test)]
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }
}
impl Operator for SimulatedOperator {
    fn notify(&mut self, message: &str) {
        log::info!("{message}");
        self.transcript.push(message.to_string());
    }
    fn prompt(&mut self, question: &str) -> Result<String, ProdTestError> {
        self.transcript.push(question.to_string());
        Ok(String::new())
    }
    fn confirm_mode(&mut self, channel: usize, mode: TestMode) -> Result<bool, ProdTestError> {
        let index = self.confirmations;
        self.confirmations += 1;
        self.transcript
            .push(format!("channel {channel}: switch to {}", mode.switch_position()));
        if self.quit_at == Some(index) {
            return Ok(false);
        }
        self.bench.borrow_mut().input_gain = match mode {
            TestMode::FullScale => 1.0,
            TestMode::Attenuated => self.attenuation,
        };
        Ok(true)
    }
}
/// Bench instruments driven by hand: the operator sets up the generator
/// and keys in the voltmeter reading.
pub struct BenchStimulus<O: Operator> {
    operator: O,
    next_handle: u32,
}
impl<O: Operator> BenchStimulus<O> {
    pub fn new(operator: O) -> Self {
        Self {
            operator,
            next_handle: 1,
        }
    }
}
impl<O: Operator> StimulusController for BenchStimulus<O> {
    fn generate(&mut self, settings: &StimulusSettings) -> Result<StimulusHandle, ProdTestError> {
        let ready = self.operator.confirm(&format!(
            "Set the generator to {} Hz sine, {} V peak, {} V offset, {} deg, output on",
            settings.freq_hz, settings.amplitude, settings.offset, settings.phase_deg
        ))?;
        if !ready {
            return Err(ProdTestError::Aborted);
        }
        let handle = StimulusHandle(self.next_handle);
        self.next_handle += 1;
        Ok(handle)
    }
    fn stop(&mut self, _handle: StimulusHandle) -> Result<(), ProdTestError> {
        self.operator.notify("Switch the generator output off");
        Ok(())
    }
    fn measure_dc(&mut self) -> Result<f64, ProdTestError> {
        self.operator.read_value("DC voltage at the board input (V):")
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use crate::drivers::source::BenchState;
    #[test]
    fn confirm_treats_q_as_quit() {
        let mut op = ScriptedOperator::new(["", "q"]);
        assert!(op.confirm("ready?").unwrap());
        assert!(!op.confirm("ready?").unwrap());
        assert!(matches!(op.confirm("ready?"), Err(ProdTestError::Aborted)));
    }
    #[test]
    fn read_value_retries_until_numeric() {
        let mut op = ScriptedOperator::new(["eleven", "", " 11.02 "]);
        assert_eq!(op.read_value("DC?").unwrap(), 11.02);
        let complaints = op
            .transcript()
            .iter()
            .filter(|l| l.contains("is not a number"))
            .count();
        assert_eq!(complaints, 2);
    }
    #[test]
    fn mode_prompt_names_switch_and_channel() {
        let mut op = ScriptedOperator::new([""]);
        assert!(op.confirm_mode(3, TestMode::Attenuated).unwrap());
        assert!(op.transcript()[0].contains("attenuated"));
        assert!(op.transcript()[0].contains("channel 3"));
    }
    #[test]
    fn simulated_operator_moves_the_switch() {
        let bench = Rc::new(RefCell::new(BenchState::default()));
        let mut op = SimulatedOperator::new(bench.clone(), 0.25);
        assert!(op.confirm_mode(0, TestMode::Attenuated).unwrap());
        assert_eq!(bench.borrow().input_gain, 0.25);
        assert!(op.confirm_mode(0, TestMode::FullScale).unwrap());
        assert_eq!(bench.borrow().input_gain, 1.0);
        op.quit_at = Some(2);
        assert!(!op.confirm_mode(1, TestMode::FullScale).unwrap());
    }
    #[test]
    fn bench_stimulus_asks_operator() {
        let mut stim = BenchStimulus::new(ScriptedOperator::new(["", "10.98"]));
        let handle = stim.generate(&StimulusSettings::default()).unwrap();
        assert_eq!(stim.measure_dc().unwrap(), 10.98);
        stim.stop(handle).unwrap();
        let transcript = stim.operator.transcript();
        assert!(transcript[0].contains("1000 Hz"));
        assert_eq!(transcript.last().unwrap(), "Switch the generator output off");
    }
    #[test]
    fn bench_stimulus_quit_aborts() {
        let mut stim = BenchStimulus::new(ScriptedOperator::new(["q"]));
        assert!(matches!(
            stim.generate(&StimulusSettings::default()),
            Err(ProdTestError::Aborted)
        ));
    }
}
