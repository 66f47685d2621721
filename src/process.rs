//! Запуск внешних процессов: конвертер датасетов, мост к библиотеке моделей и скрипт оценки ошибок.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::PipelineError;

/// Команда из конфигурации: программа, фиксированные аргументы и необязательный таймаут.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn from_argv(argv: &[String], timeout_secs: Option<u64>) -> Result<Self, String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| "command must not be empty".to_string())?;
        if program.trim().is_empty() {
            return Err("command program must not be blank".to_string());
        }
        if timeout_secs == Some(0) {
            return Err("timeout_secs must be > 0".to_string());
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: timeout_secs.map(Duration::from_secs),
        })
    }

    fn build(&self, extra_args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).args(extra_args).kill_on_drop(true);
        command
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout.map_or(0, |timeout| timeout.as_secs())
    }
}

/// Запускает команду, передаёт `input` в stdin и возвращает stdout.
/// Ненулевой код возврата считается ошибкой.
pub async fn run_command(
    spec: &CommandSpec,
    extra_args: &[&str],
    input: Option<&[u8]>,
) -> Result<Vec<u8>, PipelineError> {
    debug!(program = %spec.program, args = ?spec.args, extra = ?extra_args, "Spawning command");
    let mut command = spec.build(extra_args);
    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    let mut child = command.spawn().map_err(|source| PipelineError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    let stdin = child.stdin.take();
    let exchange = async move {
        let write = async move {
            if let (Some(mut pipe), Some(bytes)) = (stdin, input) {
                pipe.write_all(bytes).await?;
                pipe.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        tokio::join!(write, child.wait_with_output())
    };

    let (written, output) = with_timeout(spec, exchange).await?;
    let output = output.map_err(|source| PipelineError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    if !output.status.success() {
        return Err(PipelineError::CommandFailed {
            program: spec.program.clone(),
            status: output.status,
        });
    }
    // Ошибку записи смотрим только после кода возврата: упавший процесс закрывает pipe раньше.
    written.map_err(|source| PipelineError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    Ok(output.stdout)
}

/// Запускает команду с унаследованным выводом и проверяет только код возврата.
pub async fn run_status(spec: &CommandSpec, extra_args: &[&str]) -> Result<(), PipelineError> {
    debug!(program = %spec.program, args = ?spec.args, extra = ?extra_args, "Spawning command");
    let mut command = spec.build(extra_args);
    command.stdin(Stdio::null());
    let mut child = command.spawn().map_err(|source| PipelineError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    let status = with_timeout(spec, child.wait())
        .await?
        .map_err(|source| PipelineError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(PipelineError::CommandFailed {
            program: spec.program.clone(),
            status,
        })
    }
}

async fn with_timeout<F: Future>(spec: &CommandSpec, future: F) -> Result<F::Output, PipelineError> {
    match spec.timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| PipelineError::Timeout {
                program: spec.program.clone(),
                secs: spec.timeout_secs(),
            }),
        None => Ok(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn splits_program_and_args() {
        let spec = CommandSpec::from_argv(&argv(&["Rscript", "--vanilla", "a.R"]), Some(5)).unwrap();
        assert_eq!(spec.program, "Rscript");
        assert_eq!(spec.args, argv(&["--vanilla", "a.R"]));
        assert_eq!(spec.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn rejects_empty_command() {
        assert!(CommandSpec::from_argv(&[], None).is_err());
        assert!(CommandSpec::from_argv(&argv(&["  "]), None).is_err());
        assert!(CommandSpec::from_argv(&argv(&["true"]), Some(0)).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pipes_stdin_to_stdout() {
        let spec = CommandSpec::from_argv(&argv(&["cat"]), Some(10)).unwrap();
        let out = run_command(&spec, &[], Some(b"hello".as_slice())).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_non_zero_exit() {
        let spec = CommandSpec::from_argv(&argv(&["sh", "-c", "exit 3"]), None).unwrap();
        let err = run_status(&spec, &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::CommandFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn enforces_timeout() {
        let spec = CommandSpec::from_argv(&argv(&["sleep", "5"]), Some(1)).unwrap();
        let err = run_status(&spec, &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { secs: 1, .. }));
    }
}
