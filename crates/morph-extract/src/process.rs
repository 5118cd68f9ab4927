//! Long-lived tagger subprocess speaking a line protocol.
//!
//! Each request is one line on the child's stdin. The child answers with one
//! line on stdout: nodes separated by `\r`, each node
//! `base\tinflected\tpos\tsub_pos\treading` (a MeCab `--node-format` of
//! `%f[6]\t%m\t%f[0]\t%f[1]\t%f[7]\r` with `--eos-format=\n` produces exactly
//! this). Nodes with the wrong arity are dropped.
//!
//! Requests and responses are paired strictly in order, so the exchange runs
//! under a mutex. If the child dies or an exchange fails halfway, pairing can
//! no longer be trusted and the worker is poisoned until [`ProcessAnalyzer::restart`].
//!
//! With a [`DictionaryCheck`] configured, the program is first asked for its
//! parameters (`-P`) and dictionary info (`-D`); a dictionary with another
//! feature layout or a non-UTF-8 charset is rejected before the worker starts.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Mutex, MutexGuard};

use morph_types::Morpheme;
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, AnalyzerError};

const NODE_SEPARATOR: char = '\r';
const NODE_FIELDS: usize = 5;
const IPADIC_BOS_FEATURE: &str = "BOS/EOS,*,*,*,*,*,*,*,*";

/// Dictionary requirements verified before a tagger process is started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DictionaryCheck {
    /// Arguments placed before `-P`/`-D`, e.g. `-d <dicdir>`.
    pub base_args: Vec<String>,
    /// Expected `bos-feature` reported by `-P`.
    pub bos_feature: String,
}

impl DictionaryCheck {
    /// The ipadic layout the MeCab node format relies on.
    pub fn ipadic() -> Self {
        Self {
            base_args: Vec::new(),
            bos_feature: IPADIC_BOS_FEATURE.into(),
        }
    }

    pub fn verify(&self, program: &str) -> Result<(), AnalyzerError> {
        let reject = |reason: String| AnalyzerError::Dictionary {
            program: program.to_string(),
            reason,
        };

        let params = self.query(program, "-P")?;
        let bos = dump_field(&params, "bos-feature")
            .ok_or_else(|| reject("no bos-feature in `-P` output".into()))?;
        if bos != self.bos_feature {
            return Err(reject(format!(
                "expected bos-feature `{}`, found `{bos}`",
                self.bos_feature
            )));
        }

        let info = self.query(program, "-D")?;
        let charset = dump_field(&info, "charset")
            .ok_or_else(|| reject("no charset in `-D` output".into()))?;
        let normalized = charset.to_ascii_lowercase().replace('-', "");
        if normalized != "utf8" {
            return Err(reject(format!("charset `{charset}` is not UTF-8")));
        }
        debug!("`{program}` dictionary ok (charset {charset})");
        Ok(())
    }

    fn query(&self, program: &str, flag: &str) -> Result<String, AnalyzerError> {
        let output = Command::new(program)
            .args(&self.base_args)
            .arg(flag)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| AnalyzerError::Spawn {
                program: program.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(AnalyzerError::Dictionary {
                program: program.to_string(),
                reason: format!("`{flag}` exited with {}", output.status),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Value of a `key: value` or `key:\tvalue` line.
fn dump_field<'a>(dump: &'a str, key: &str) -> Option<&'a str> {
    dump.lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
        .map(str::trim)
}

/// How to launch and interpret a tagger process.
#[derive(Clone, Debug, Default)]
pub struct ProcessConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Stable identity used as the cache key prefix.
    pub description: String,
    /// Parts of speech to drop entirely (punctuation, symbols).
    pub pos_blacklist: Vec<String>,
    /// Parts of speech whose reading is replaced with the reading of the base
    /// form, for taggers that report the reading of the inflected surface.
    pub base_reading_pos: Vec<String>,
    /// Verified once per spawn, before the worker starts.
    pub dictionary_check: Option<DictionaryCheck>,
}

impl ProcessConfig {
    pub fn new(program: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Settings for `mecab` with the ipadic dictionary.
    pub fn mecab() -> Self {
        Self {
            program: "mecab".into(),
            args: vec![
                "--node-format=%f[6]\t%m\t%f[0]\t%f[1]\t%f[7]\r".into(),
                "--eos-format=\n".into(),
                "--unk-format=".into(),
            ],
            description: "Japanese".into(),
            pos_blacklist: vec!["記号".into()],
            base_reading_pos: vec!["動詞".into(), "助動詞".into(), "形容詞".into()],
            dictionary_check: Some(DictionaryCheck::ipadic()),
        }
    }
}

struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    fn spawn(config: &ProcessConfig) -> Result<Self, AnalyzerError> {
        if let Some(check) = &config.dictionary_check {
            check.verify(&config.program)?;
        }
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| AnalyzerError::Spawn {
                program: config.program.clone(),
                source,
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(AnalyzerError::Desync);
        };
        info!("started analyzer process `{}` (pid {})", config.program, child.id());
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn exchange(&mut self, text: &str) -> Result<String, AnalyzerError> {
        // One request line must produce one response line.
        let request: String = text
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        self.stdin.write_all(request.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;

        let mut response = String::new();
        if self.stdout.read_line(&mut response)? == 0 {
            return Err(AnalyzerError::Desync);
        }
        let trimmed = response.trim_end_matches(['\n', '\r']).len();
        response.truncate(trimmed);
        Ok(response)
    }

    fn stop(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

enum WorkerState {
    Idle,
    Running(Worker),
    Poisoned,
}

/// [`Analyzer`] backed by a single child process, started on first use.
pub struct ProcessAnalyzer {
    config: ProcessConfig,
    state: Mutex<WorkerState>,
}

impl ProcessAnalyzer {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WorkerState::Idle),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Whether a previous failure left the worker unusable.
    pub fn is_poisoned(&self) -> bool {
        match self.state.lock() {
            Ok(state) => matches!(*state, WorkerState::Poisoned),
            Err(_) => true,
        }
    }

    /// Kill the current child (if any); the next call starts a fresh one.
    pub fn restart(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let WorkerState::Running(worker) = std::mem::replace(&mut *state, WorkerState::Idle) {
            worker.stop();
        }
        debug!("analyzer `{}` reset", self.config.program);
    }

    /// Stop the child process. Equivalent to [`restart`](Self::restart) without the intent to reuse.
    pub fn shutdown(&self) {
        self.restart();
    }

    fn lock(&self) -> Result<MutexGuard<'_, WorkerState>, AnalyzerError> {
        self.state.lock().map_err(|_| AnalyzerError::Poisoned)
    }

    fn interact(&self, state: &mut WorkerState, text: &str) -> Result<String, AnalyzerError> {
        if matches!(state, WorkerState::Idle) {
            *state = WorkerState::Running(Worker::spawn(&self.config)?);
        }
        let result = match state {
            WorkerState::Running(worker) => worker.exchange(text),
            WorkerState::Poisoned => return Err(AnalyzerError::Poisoned),
            WorkerState::Idle => unreachable!("worker spawned above"),
        };
        if let Err(err) = &result {
            warn!(
                "analyzer `{}` failed mid-exchange, poisoning worker: {err}",
                self.config.program
            );
            if let WorkerState::Running(worker) = std::mem::replace(state, WorkerState::Poisoned) {
                worker.stop();
            }
        }
        result
    }

    fn parse_nodes(&self, response: &str) -> Vec<Morpheme> {
        response
            .split(NODE_SEPARATOR)
            .filter_map(parse_node)
            .filter(|m| !self.config.pos_blacklist.iter().any(|p| p == m.pos()))
            .collect()
    }
}

impl Analyzer for ProcessAnalyzer {
    fn description(&self) -> &str {
        &self.config.description
    }

    fn extract(&self, text: &str) -> Result<Vec<Morpheme>, AnalyzerError> {
        let mut state = self.lock()?;
        let response = self.interact(&mut state, text)?;
        let mut morphemes = self.parse_nodes(&response);

        for m in morphemes.iter_mut() {
            if !self.config.base_reading_pos.iter().any(|p| p == m.pos()) {
                continue;
            }
            let base_response = self.interact(&mut state, m.base())?;
            let nodes: Vec<&str> = base_response.split(NODE_SEPARATOR).collect();
            if let [single] = nodes.as_slice()
                && let Some(base_node) = parse_node(single)
            {
                *m = m.with_reading(base_node.reading().trim());
            }
        }
        Ok(morphemes)
    }
}

impl Drop for ProcessAnalyzer {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let WorkerState::Running(worker) = std::mem::replace(state, WorkerState::Idle) {
            worker.stop();
        }
    }
}

fn parse_node(node: &str) -> Option<Morpheme> {
    let fields: Vec<&str> = node.split('\t').collect();
    if fields.len() != NODE_FIELDS {
        return None;
    }
    Some(Morpheme::new(
        fields[0], fields[1], fields[2], fields[3], fields[4],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_nodes_only() {
        let analyzer = ProcessAnalyzer::new(ProcessConfig {
            pos_blacklist: vec!["記号".into()],
            ..ProcessConfig::new("unused", "test")
        });
        let response = "犬\t犬\t名詞\t一般\tイヌ\rが\tが\t助詞\t格助詞\tガ\r。\t。\t記号\t句点\t。\rgarbage";
        let ms = analyzer.parse_nodes(response);
        let bases: Vec<&str> = ms.iter().map(Morpheme::base).collect();
        assert_eq!(bases, vec!["犬", "が"]);
    }

    #[test]
    fn spawn_failure_is_reported() {
        let analyzer = ProcessAnalyzer::new(ProcessConfig::new(
            "/definitely/not/a/tagger",
            "missing",
        ));
        let err = analyzer.extract("text").unwrap_err();
        assert!(matches!(err, AnalyzerError::Spawn { .. }));
        assert!(!analyzer.is_poisoned());
    }

    #[cfg(unix)]
    #[test]
    fn echo_process_round_trips_nodes() {
        // `cat` echoes each request line, so a request that is already a node
        // comes back as that node.
        let analyzer = ProcessAnalyzer::new(ProcessConfig::new("cat", "echo"));
        let ms = analyzer.extract("歩く\t歩い\t動詞\t自立\tアルイ").unwrap();
        assert_eq!(ms.len(), 1);
        assert_eq!(ms[0].inflected(), "歩い");
        assert_eq!(ms[0].reading(), "アルイ");

        let again = analyzer.extract("猫\t猫\t名詞\t一般\tネコ").unwrap();
        assert_eq!(again[0].base(), "猫");
        assert!(analyzer.extract("plain words").unwrap().is_empty());
        analyzer.shutdown();
    }

    #[cfg(unix)]
    #[test]
    fn exited_process_poisons_until_restart() {
        let analyzer = ProcessAnalyzer::new(ProcessConfig::new("true", "exits"));
        assert!(analyzer.extract("anything").is_err());
        assert!(analyzer.is_poisoned());
        assert!(matches!(
            analyzer.extract("anything"),
            Err(AnalyzerError::Poisoned)
        ));

        analyzer.restart();
        assert!(!analyzer.is_poisoned());
    }

    #[cfg(unix)]
    #[test]
    fn concurrent_callers_get_their_own_responses() {
        let analyzer = ProcessAnalyzer::new(ProcessConfig::new("cat", "echo"));
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let analyzer = &analyzer;
                scope.spawn(move || {
                    for i in 0..25 {
                        let base = format!("w{worker}_{i}");
                        let request = format!("{base}\t{base}\t名詞\t一般\tR");
                        let ms = analyzer.extract(&request).unwrap();
                        assert_eq!(ms.len(), 1);
                        assert_eq!(ms[0].base(), base);
                    }
                });
            }
        });
        assert!(!analyzer.is_poisoned());
    }

    /// `sh` stand-in for a tagger: answers `-P`/`-D` like MeCab and echoes otherwise.
    #[cfg(unix)]
    fn stub_tagger(bos_feature: &str, charset: &str) -> ProcessConfig {
        let script = format!(
            "case \"$1\" in \
             -P) printf '%s\\n' 'cost-factor: 700' 'bos-feature: {bos_feature}' ;; \
             -D) printf 'filename:\\t/dic/sys.dic\\ncharset:\\t{charset}\\n' ;; \
             *) exit 1 ;; esac"
        );
        ProcessConfig {
            args: vec!["-c".into(), "exec cat".into()],
            dictionary_check: Some(DictionaryCheck {
                base_args: vec!["-c".into(), script, "stub".into()],
                bos_feature: IPADIC_BOS_FEATURE.into(),
            }),
            ..ProcessConfig::new("sh", "stub")
        }
    }

    #[test]
    fn reads_dump_fields() {
        let dump = "cost-factor: 700\nbos-feature: BOS/EOS,*,*\ncharset:\tUTF-8\n";
        assert_eq!(dump_field(dump, "bos-feature"), Some("BOS/EOS,*,*"));
        assert_eq!(dump_field(dump, "charset"), Some("UTF-8"));
        assert_eq!(dump_field(dump, "cost"), None);
    }

    #[cfg(unix)]
    #[test]
    fn ipadic_utf8_dictionary_is_accepted() {
        let analyzer = ProcessAnalyzer::new(stub_tagger(IPADIC_BOS_FEATURE, "UTF-8"));
        let ms = analyzer.extract("猫\t猫\t名詞\t一般\tネコ").unwrap();
        assert_eq!(ms[0].reading(), "ネコ");
        analyzer.shutdown();
    }

    #[cfg(unix)]
    #[test]
    fn other_dictionary_layout_is_rejected() {
        let analyzer = ProcessAnalyzer::new(stub_tagger("BOS/EOS,*,*,*,*,*,*,*,*,*,*,*,*", "utf8"));
        let err = analyzer.extract("猫").unwrap_err();
        assert!(matches!(err, AnalyzerError::Dictionary { ref reason, .. } if reason.contains("bos-feature")));
        assert!(!analyzer.is_poisoned());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_charset_is_rejected() {
        let analyzer = ProcessAnalyzer::new(stub_tagger(IPADIC_BOS_FEATURE, "EUC-JP"));
        let err = analyzer.extract("猫").unwrap_err();
        assert!(matches!(err, AnalyzerError::Dictionary { ref reason, .. } if reason.contains("EUC-JP")));
    }

    #[cfg(unix)]
    #[test]
    fn failing_dictionary_query_is_rejected() {
        let analyzer = ProcessAnalyzer::new(ProcessConfig {
            dictionary_check: Some(DictionaryCheck::ipadic()),
            ..ProcessConfig::new("false", "fails")
        });
        assert!(matches!(
            analyzer.extract("猫"),
            Err(AnalyzerError::Dictionary { .. })
        ));
    }
}
