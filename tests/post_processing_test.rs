use anyhow::Result;
use socket_inbox::postproc::PostProcessor;
use socket_inbox::{client, Server, ServerConfig};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_post_processing_receives_saved_path() -> Result<()> {
    let temp = TempDir::new()?;
    let marker = temp.path().join("invoked-with");
    let script = temp.path().join("postproc.sh");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\nprintf '%s' \"$1\" > \"{marker}.tmp\"\nmv \"{marker}.tmp\" \"{marker}\"\n",
            marker = marker.display()
        ),
    )?;
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;

    let mut config = ServerConfig::new("127.0.0.1", 0, temp.path().join("data"));
    config.post_processing = Some(script);
    let server = Server::bind(config).await?;
    let addr = server.local_addr();
    let ctx = server.context();
    tokio::spawn(server.run());

    client::send_message("127.0.0.1", addr.port(), b"hello").await?;

    let mut waited = Duration::ZERO;
    while !marker.exists() {
        assert!(waited < Duration::from_secs(10), "post-processing never ran");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    let saved = PathBuf::from(fs::read_to_string(&marker)?);
    assert!(saved.starts_with(ctx.config().inbox_dir()));
    assert_eq!(saved.extension().and_then(|e| e.to_str()), Some("raw"));
    assert_eq!(fs::read(&saved)?, b"hello");
    Ok(())
}

#[tokio::test]
async fn test_failing_post_processing_does_not_affect_server() -> Result<()> {
    let temp = TempDir::new()?;
    let mut config = ServerConfig::new("127.0.0.1", 0, temp.path());
    config.post_processing = Some(PathBuf::from("/bin/false"));
    let server = Server::bind(config).await?;
    let addr = server.local_addr();
    let ctx = server.context();
    tokio::spawn(server.run());

    for payload in [&b"one"[..], &b"two"[..]] {
        client::send_message("127.0.0.1", addr.port(), payload).await?;
    }

    let inbox = ctx.config().inbox_dir();
    let mut waited = Duration::ZERO;
    loop {
        let saved = fs::read_dir(&inbox)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "raw"))
            .count();
        if saved == 2 {
            break;
        }
        assert!(waited < Duration::from_secs(10), "expected two saved messages");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    Ok(())
}

#[test]
fn test_post_processing_outlives_runtime() -> Result<()> {
    let temp = TempDir::new()?;
    let started = temp.path().join("started");
    let done = temp.path().join("done");
    let script = temp.path().join("slow.sh");
    fs::write(
        &script,
        format!(
            "touch \"{}\"\nsleep 1\ntouch \"{}\"\n",
            started.display(),
            done.display()
        ),
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        let post = PostProcessor::new(Some(PathBuf::from("/bin/sh")), None);
        let _detached = post.invoke(&script);
        while !started.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
    drop(runtime);

    let mut waited = Duration::ZERO;
    while !done.exists() {
        assert!(waited < Duration::from_secs(10), "child was killed with the runtime");
        std::thread::sleep(Duration::from_millis(20));
        waited += Duration::from_millis(20);
    }
    Ok(())
}
