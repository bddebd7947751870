//! Build cache integration tests.
//!
//! `sh` + `cp` stand in for the compiler; every build appends a line to a
//! counter file so tests can assert exactly how many builds ran.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filetime::{FileTime, set_file_mtime};
use pixelforge::build::{BuildCache, BuildCommand, BuildOutcome};
use pixelforge::PixelforgeError;

const T0: i64 = 1_700_000_000;
const T1: i64 = 1_700_000_100;

struct Fixture {
    root: tempfile::TempDir,
    source: PathBuf,
    executable: PathBuf,
    counter: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("mandelbrot.cu");
        std::fs::write(&source, "__global__ void mandelbrot() {}\n").unwrap();
        set_file_mtime(&source, FileTime::from_unix_time(T1, 0)).unwrap();

        Self {
            executable: dir.path().join("tmp").join("mandelbrot"),
            counter: dir.path().join("builds.log"),
            source,
            root: dir,
        }
    }

    fn dir(&self) -> &Path {
        self.root.path()
    }

    /// Copies the source to the output, slowly enough to overlap callers.
    fn counting_build(&self, delay: &str) -> BuildCommand {
        let script = format!("echo built >> \"$0\"; sleep {}; cp \"$1\" \"$2\"", delay);
        BuildCommand::new(
            "sh",
            [
                "-c".to_string(),
                script,
                self.counter.display().to_string(),
                "{source}".to_string(),
                "{output}".to_string(),
            ],
        )
    }

    fn builds(&self) -> usize {
        std::fs::read_to_string(&self.counter)
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }

    fn write_executable(&self, mtime: i64) {
        std::fs::create_dir_all(self.executable.parent().unwrap()).unwrap();
        std::fs::write(&self.executable, "old build").unwrap();
        set_file_mtime(&self.executable, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    fn mtime(path: &Path) -> FileTime {
        FileTime::from_last_modification_time(&std::fs::metadata(path).unwrap())
    }
}

fn script_build(script: &str) -> BuildCommand {
    BuildCommand::new("sh", ["-c", script, "sh", "{source}", "{output}"])
}

#[tokio::test]
async fn test_missing_executable_is_built() {
    let fx = Fixture::new();
    let cache = BuildCache::new(fx.counting_build("0"));

    let outcome = cache.ensure(&fx.source, &fx.executable).await.unwrap();

    assert_eq!(outcome, BuildOutcome::Rebuilt);
    assert_eq!(fx.builds(), 1);
    assert!(fx.executable.is_file());
    assert!(Fixture::mtime(&fx.executable) >= Fixture::mtime(&fx.source));
    assert!(cache.is_fresh(&fx.source, &fx.executable).await.unwrap());
}

#[tokio::test]
async fn test_fresh_executable_is_not_rebuilt() {
    let fx = Fixture::new();
    fx.write_executable(T1);
    let cache = BuildCache::new(fx.counting_build("0"));

    let outcome = cache.ensure(&fx.source, &fx.executable).await.unwrap();

    assert_eq!(outcome, BuildOutcome::Fresh);
    assert_eq!(fx.builds(), 0);
    assert_eq!(std::fs::read_to_string(&fx.executable).unwrap(), "old build");
}

#[tokio::test]
async fn test_stale_executable_is_rebuilt_once() {
    let fx = Fixture::new();
    fx.write_executable(T0);
    let cache = BuildCache::new(fx.counting_build("0"));

    assert_eq!(
        cache.ensure(&fx.source, &fx.executable).await.unwrap(),
        BuildOutcome::Rebuilt
    );
    assert_eq!(
        cache.ensure(&fx.source, &fx.executable).await.unwrap(),
        BuildOutcome::Fresh
    );
    assert_eq!(fx.builds(), 1);
    assert_eq!(
        std::fs::read_to_string(&fx.executable).unwrap(),
        std::fs::read_to_string(&fx.source).unwrap()
    );
}

#[tokio::test]
async fn test_missing_source_is_a_hard_error() {
    let fx = Fixture::new();
    let cache = BuildCache::new(fx.counting_build("0"));

    let err = cache
        .ensure(&fx.dir().join("gone.cu"), &fx.executable)
        .await
        .unwrap_err();

    assert!(matches!(err, PixelforgeError::SourceMissing(_)));
    assert_eq!(fx.builds(), 0);
}

#[tokio::test]
async fn test_missing_tool() {
    let fx = Fixture::new();
    let cache = BuildCache::new(BuildCommand::new(
        "pixelforge-no-such-compiler",
        ["-o", "{output}", "{source}"],
    ));

    let err = cache.ensure(&fx.source, &fx.executable).await.unwrap_err();
    match err {
        PixelforgeError::ToolMissing { program } => {
            assert_eq!(program, "pixelforge-no-such-compiler")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_build_surfaces_diagnostics_and_leaves_nothing_behind() {
    let fx = Fixture::new();
    let cache = BuildCache::new(script_build(
        "echo partial > \"$2\"; echo 'mandelbrot.cu(3): error: expected a \";\"' >&2; exit 2",
    ));

    let err = cache.ensure(&fx.source, &fx.executable).await.unwrap_err();
    match err {
        PixelforgeError::BuildFailed {
            command,
            diagnostics,
        } => {
            assert!(command.starts_with("sh -c"));
            assert!(diagnostics.contains("error: expected"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert!(!fx.executable.exists());
    let leftovers = std::fs::read_dir(fx.executable.parent().unwrap())
        .unwrap()
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_tool_that_writes_nothing_fails() {
    let fx = Fixture::new();
    let cache = BuildCache::new(script_build("exit 0"));

    let err = cache.ensure(&fx.source, &fx.executable).await.unwrap_err();
    assert!(matches!(err, PixelforgeError::BuildFailed { .. }));
    assert!(!fx.executable.exists());
}

#[tokio::test]
async fn test_build_timeout() {
    let fx = Fixture::new();
    let cache =
        BuildCache::new(script_build("exec sleep 30")).with_timeout(Duration::from_millis(300));

    let err = cache.ensure(&fx.source, &fx.executable).await.unwrap_err();
    assert!(matches!(err, PixelforgeError::Timeout { .. }), "got {:?}", err);
    assert!(!fx.executable.exists());
}

#[tokio::test]
async fn test_build_timeout_stops_tool_subprocesses() {
    let fx = Fixture::new();
    // A compiler driver whose backend writes the output after the driver is killed.
    let cache = BuildCache::new(script_build("(sleep 1; echo obj > \"$2\") & sleep 30"))
        .with_timeout(Duration::from_millis(300));

    let err = cache.ensure(&fx.source, &fx.executable).await.unwrap_err();
    assert!(matches!(err, PixelforgeError::Timeout { .. }), "got {:?}", err);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let leftovers: Vec<_> = std::fs::read_dir(fx.executable.parent().unwrap())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_build() {
    let fx = Arc::new(Fixture::new());
    fx.write_executable(T0);
    let cache = Arc::new(BuildCache::new(fx.counting_build("0.3")));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let fx = Arc::clone(&fx);
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.ensure(&fx.source, &fx.executable).await })
        })
        .collect();

    let mut rebuilt = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == BuildOutcome::Rebuilt {
            rebuilt += 1;
        }
    }

    assert_eq!(rebuilt, 1);
    assert_eq!(fx.builds(), 1);
}
