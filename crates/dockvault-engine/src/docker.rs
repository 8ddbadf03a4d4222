use crate::backend::{ContainerEngine, ContainerSummary, CreateParams, ImageSummary};
use crate::EngineError;
use dockvault_schema::{ContainerId, ContainerSnapshot, ContainerStatus, ImageId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Engine backend that drives the `docker` CLI (or a compatible one, e.g.
/// `podman`) as a subprocess.
///
/// Request/response commands are bounded by `timeout`. Streaming commands
/// (`export`, `save`, `load`, `cp`) run until the stream ends; their duration
/// depends on the data size and is left to the engine.
pub struct DockerCliEngine {
    command: String,
    timeout: Duration,
}

impl DockerCliEngine {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.command, args.join(" "))
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(args);
        cmd
    }

    fn spawn_error(&self, e: io::Error) -> EngineError {
        if e.kind() == io::ErrorKind::NotFound {
            EngineError::Unavailable(format!("'{}' not found in PATH", self.command))
        } else {
            EngineError::Io(e)
        }
    }

    /// Run a request/response command under the deadline. Returns stdout.
    fn run(&self, args: &[&str]) -> Result<Output, EngineError> {
        let described = self.describe(args);
        debug!("exec: {described}");
        let mut child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = thread::spawn(move || read_all(stdout));
        let err_reader = thread::spawn(move || read_all(stderr));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Timeout {
                    command: described,
                    secs: self.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = Output {
            status,
            stdout: out_reader.join().unwrap_or_default(),
            stderr: err_reader.join().unwrap_or_default(),
        };
        if !output.status.success() {
            return Err(classify(
                described,
                output.status,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }
        Ok(output)
    }

    fn run_stdout(&self, args: &[&str]) -> Result<String, EngineError> {
        let output = self.run(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, EngineError> {
        let output = self.run(args)?;
        serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::Parse(format!("{}: {e}", self.describe(args))))
    }

    /// Pipe the command's stdout into `out`.
    fn run_streaming_out(&self, args: &[&str], out: &mut dyn Write) -> Result<u64, EngineError> {
        let described = self.describe(args);
        debug!("exec (stream out): {described}");
        let mut child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stderr = child.stderr.take();
        let err_reader = thread::spawn(move || read_all(stderr));

        let copied = match child.stdout.take() {
            Some(mut stdout) => io::copy(&mut stdout, out),
            None => Ok(0),
        };
        if copied.is_err() {
            let _ = child.kill();
        }
        let status = child.wait()?;
        let stderr = err_reader.join().unwrap_or_default();
        if !status.success() {
            return Err(classify(
                described,
                status,
                &String::from_utf8_lossy(&stderr),
            ));
        }
        let copied = copied?;
        out.flush()?;
        Ok(copied)
    }

    /// Feed `input` to the command's stdin.
    fn run_streaming_in(&self, args: &[&str], input: &mut dyn Read) -> Result<(), EngineError> {
        let described = self.describe(args);
        debug!("exec (stream in): {described}");
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = thread::spawn(move || read_all(stdout));
        let err_reader = thread::spawn(move || read_all(stderr));

        let copied = match child.stdin.take() {
            // stdin is dropped at the end of the arm, closing the pipe
            Some(mut stdin) => io::copy(input, &mut stdin),
            None => Ok(0),
        };
        if copied.is_err() {
            let _ = child.kill();
        }
        let status = child.wait()?;
        let _ = out_reader.join();
        let stderr = err_reader.join().unwrap_or_default();
        if !status.success() {
            return Err(classify(
                described,
                status,
                &String::from_utf8_lossy(&stderr),
            ));
        }
        copied?;
        Ok(())
    }

    fn image_tags(&self, image_id: &str) -> Vec<String> {
        match self.get_image(image_id) {
            Ok(Some(image)) => image.tags,
            _ => Vec::new(),
        }
    }
}

fn read_all(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut p) = pipe {
        let _ = p.read_to_end(&mut buf);
    }
    buf
}

/// Map a failed CLI invocation to the most specific error its stderr allows.
fn classify(command: String, status: ExitStatus, stderr: &str) -> EngineError {
    let lower = stderr.to_lowercase();
    let trimmed = stderr.trim().to_owned();
    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("error during connect")
    {
        EngineError::Unavailable(trimmed)
    } else if lower.contains("no such container") {
        EngineError::ContainerNotFound(trimmed)
    } else if lower.contains("no such image") {
        EngineError::ImageNotFound(trimmed)
    } else if lower.contains("already in use") {
        EngineError::Conflict(trimmed)
    } else {
        EngineError::CommandFailed {
            command,
            status: status.code(),
            stderr: trimmed,
        }
    }
}

fn field<T: DeserializeOwned + Default>(value: &Value, what: &str) -> Result<T, EngineError> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone()).map_err(|e| EngineError::Parse(format!("{what}: {e}")))
}

/// Build a snapshot from one element of `docker container inspect` output.
/// `image_tags` are the repo tags of the container's image; the first one is
/// recorded as the image reference, the image id otherwise.
pub fn snapshot_from_inspect(
    inspect: &Value,
    image_tags: &[String],
) -> Result<ContainerSnapshot, EngineError> {
    let id = inspect["Id"]
        .as_str()
        .ok_or_else(|| EngineError::Parse("inspect output has no Id".to_owned()))?;
    let id = ContainerId::new(id);
    let image = image_tags
        .iter()
        .find(|t| *t != "<none>:<none>")
        .cloned()
        .or_else(|| inspect["Image"].as_str().map(str::to_owned))
        .unwrap_or_default();
    let networks = inspect["NetworkSettings"]["Networks"]
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();

    Ok(ContainerSnapshot {
        short_id: id.short().to_owned(),
        name: inspect["Name"]
            .as_str()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_owned(),
        status: ContainerStatus::parse(inspect["State"]["Status"].as_str().unwrap_or_default()),
        image,
        created: inspect["Created"].as_str().map(str::to_owned),
        started: inspect["State"]["StartedAt"].as_str().map(str::to_owned),
        ports: field(&inspect["NetworkSettings"]["Ports"], "NetworkSettings.Ports")?,
        mounts: field(&inspect["Mounts"], "Mounts")?,
        env: field(&inspect["Config"]["Env"], "Config.Env")?,
        labels: field(&inspect["Config"]["Labels"], "Config.Labels")?,
        command: field(&inspect["Config"]["Cmd"], "Config.Cmd")?,
        networks,
        id,
    })
}

fn summary_from_inspect(inspect: &Value) -> Option<ContainerSummary> {
    Some(ContainerSummary {
        id: ContainerId::new(inspect["Id"].as_str()?),
        name: inspect["Name"].as_str()?.trim_start_matches('/').to_owned(),
        image: inspect["Config"]["Image"]
            .as_str()
            .unwrap_or_default()
            .to_owned(),
        status: ContainerStatus::parse(inspect["State"]["Status"].as_str().unwrap_or_default()),
    })
}

/// Parse `docker ps --format '{{json .}}'` output, one object per line.
fn parse_ps_lines(stdout: &str) -> Result<Vec<ContainerSummary>, EngineError> {
    let mut out = Vec::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let row: Value =
            serde_json::from_str(line).map_err(|e| EngineError::Parse(format!("ps: {e}")))?;
        out.push(ContainerSummary {
            id: ContainerId::new(row["ID"].as_str().unwrap_or_default()),
            name: row["Names"]
                .as_str()
                .unwrap_or_default()
                .split(',')
                .next()
                .unwrap_or_default()
                .to_owned(),
            image: row["Image"].as_str().unwrap_or_default().to_owned(),
            status: ContainerStatus::parse(row["State"].as_str().unwrap_or_default()),
        });
    }
    Ok(out)
}

fn images_from_inspect(values: &[Value]) -> Vec<ImageSummary> {
    values
        .iter()
        .filter_map(|v| {
            Some(ImageSummary {
                id: ImageId::new(v["Id"].as_str()?),
                tags: v["RepoTags"]
                    .as_array()
                    .map(|tags| {
                        tags.iter()
                            .filter_map(|t| t.as_str().map(str::to_owned))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// `docker create` arguments for `params`, excluding the leading `create`.
pub fn create_args(params: &CreateParams) -> Vec<String> {
    let mut args = vec!["--name".to_owned(), params.name.clone()];
    for (k, v) in &params.env {
        args.push("--env".to_owned());
        args.push(format!("{k}={v}"));
    }
    for vol in &params.volumes {
        args.push("--volume".to_owned());
        args.push(format!("{}:{}:{}", vol.source, vol.target, vol.mode));
    }
    for (container_port, host_port) in &params.ports {
        args.push("--publish".to_owned());
        args.push(format!("{host_port}:{container_port}"));
    }
    for (k, v) in &params.labels {
        args.push("--label".to_owned());
        args.push(format!("{k}={v}"));
    }
    args.push(params.image.clone());
    args.extend(params.command.iter().cloned());
    args
}

impl ContainerEngine for DockerCliEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn ping(&self) -> Result<(), EngineError> {
        match self.run(&["version", "--format", "{{.Server.Version}}"]) {
            Ok(out) => {
                debug!(
                    "engine server version {}",
                    String::from_utf8_lossy(&out.stdout).trim()
                );
                Ok(())
            }
            Err(e @ (EngineError::Unavailable(_) | EngineError::Timeout { .. })) => {
                Err(EngineError::Unavailable(e.to_string()))
            }
            Err(EngineError::CommandFailed { stderr, .. }) => Err(EngineError::Unavailable(stderr)),
            Err(e) => Err(e),
        }
    }

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut args = vec!["ps", "--no-trunc", "--format", "{{json .}}"];
        if all {
            args.push("--all");
        }
        parse_ps_lines(&self.run_stdout(&args)?)
    }

    fn find_container(&self, name_or_id: &str) -> Result<Option<ContainerSummary>, EngineError> {
        match self.run_json::<Vec<Value>>(&["container", "inspect", name_or_id]) {
            Ok(values) => Ok(values.first().and_then(summary_from_inspect)),
            Err(EngineError::ContainerNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn inspect(&self, name_or_id: &str) -> Result<ContainerSnapshot, EngineError> {
        let values: Vec<Value> = self.run_json(&["container", "inspect", name_or_id])?;
        let value = values
            .first()
            .ok_or_else(|| EngineError::ContainerNotFound(name_or_id.to_owned()))?;
        let tags = value["Image"]
            .as_str()
            .map(|image_id| self.image_tags(image_id))
            .unwrap_or_default();
        snapshot_from_inspect(value, &tags)
    }

    fn export_filesystem(&self, id: &str, out: &mut dyn Write) -> Result<u64, EngineError> {
        self.run_streaming_out(&["export", id], out)
    }

    fn logs(&self, id: &str, tail: usize) -> Result<String, EngineError> {
        let tail = tail.to_string();
        let output = self.run(&["logs", "--tail", &tail, "--timestamps", id])?;
        // the engine replays the container's stderr on our stderr
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    fn start(&self, id: &str) -> Result<(), EngineError> {
        self.run(&["start", id]).map(drop)
    }

    fn stop(&self, id: &str, timeout: Duration) -> Result<(), EngineError> {
        let secs = timeout.as_secs().to_string();
        self.run(&["stop", "--time", &secs, id]).map(drop)
    }

    fn create(&self, params: &CreateParams) -> Result<ContainerId, EngineError> {
        let owned = create_args(params);
        let mut args = vec!["create"];
        args.extend(owned.iter().map(String::as_str));
        let stdout = self.run_stdout(&args)?;
        let id = stdout.trim();
        if id.is_empty() {
            return Err(EngineError::Parse("create printed no container id".to_owned()));
        }
        Ok(ContainerId::new(id))
    }

    fn remove(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let mut args = vec!["rm"];
        if force {
            args.push("--force");
        }
        args.push(id);
        self.run(&args).map(drop)
    }

    fn get_image(&self, reference: &str) -> Result<Option<ImageSummary>, EngineError> {
        match self.run_json::<Vec<Value>>(&["image", "inspect", reference]) {
            Ok(values) => Ok(images_from_inspect(&values).into_iter().next()),
            Err(EngineError::ImageNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save_image(&self, reference: &str, out: &mut dyn Write) -> Result<u64, EngineError> {
        self.run_streaming_out(&["save", reference], out)
    }

    fn load_image(&self, input: &mut dyn Read) -> Result<(), EngineError> {
        self.run_streaming_in(&["load"], input)
    }

    fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        let stdout = self.run_stdout(&["images", "--quiet", "--no-trunc"])?;
        let mut ids: Vec<&str> = Vec::new();
        for id in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["image", "inspect"];
        args.extend(ids.iter().copied());
        let values: Vec<Value> = self.run_json(&args)?;
        Ok(images_from_inspect(&values))
    }

    fn tag_image(&self, image: &str, reference: &str) -> Result<(), EngineError> {
        self.run(&["tag", image, reference]).map(drop)
    }

    fn put_archive(&self, id: &str, path: &str, tar: &mut dyn Read) -> Result<(), EngineError> {
        let dest = format!("{id}:{path}");
        self.run_streaming_in(&["cp", "-", &dest], tar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VolumeSpec;
    use dockvault_schema::MountKind;
    use std::collections::BTreeMap;

    const INSPECT: &str = r#"{
        "Id": "4f66ad9a0b2e8f1c3d5e7a9b1c3d5e7f4f66ad9a0b2e8f1c3d5e7a9b1c3d5e7f",
        "Created": "2025-01-10T12:00:00.000000000Z",
        "Name": "/web",
        "Image": "sha256:5b0dbcc2e4bb",
        "State": {"Status": "running", "Running": true, "StartedAt": "2025-01-10T12:00:01Z"},
        "Mounts": [
            {"Type": "bind", "Source": "/srv/www", "Destination": "/usr/share/nginx/html", "Mode": "", "RW": true},
            {"Type": "volume", "Name": "cache", "Source": "/var/lib/docker/volumes/cache/_data", "Destination": "/cache", "Driver": "local", "RW": false}
        ],
        "Config": {
            "Env": ["PATH=/usr/bin", "MODE=prod"],
            "Cmd": ["nginx", "-g", "daemon off;"],
            "Image": "nginx:1.25",
            "Labels": {"tier": "frontend"}
        },
        "NetworkSettings": {
            "Ports": {"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}], "443/tcp": null},
            "Networks": {"bridge": {}, "backend": {}}
        }
    }"#;

    #[test]
    fn snapshot_from_inspect_maps_fields() {
        let value: Value = serde_json::from_str(INSPECT).unwrap();
        let snap = snapshot_from_inspect(&value, &["nginx:1.25".to_owned()]).unwrap();
        assert_eq!(snap.name, "web");
        assert_eq!(snap.short_id, "4f66ad9a0b2e");
        assert_eq!(snap.status, ContainerStatus::Running);
        assert_eq!(snap.image, "nginx:1.25");
        assert_eq!(snap.started.as_deref(), Some("2025-01-10T12:00:01Z"));
        assert_eq!(snap.env, vec!["PATH=/usr/bin", "MODE=prod"]);
        assert_eq!(snap.command, vec!["nginx", "-g", "daemon off;"]);
        assert_eq!(snap.labels["tier"], "frontend");
        assert_eq!(snap.networks, vec!["backend", "bridge"]);
        assert_eq!(snap.mounts.len(), 2);
        assert_eq!(snap.mounts[1].kind, MountKind::Volume);
        assert!(!snap.mounts[1].read_write);
        assert_eq!(snap.ports["80/tcp"].as_ref().unwrap()[0].host_port, "8080");
        assert!(snap.ports["443/tcp"].is_none());
    }

    #[test]
    fn untagged_image_falls_back_to_id() {
        let value: Value = serde_json::from_str(INSPECT).unwrap();
        let snap = snapshot_from_inspect(&value, &[]).unwrap();
        assert_eq!(snap.image, "sha256:5b0dbcc2e4bb");
    }

    #[test]
    fn null_config_fields_become_empty() {
        let value = serde_json::json!({
            "Id": "abc",
            "Name": "/x",
            "Config": {"Env": null, "Cmd": null, "Labels": null},
            "NetworkSettings": {"Ports": null}
        });
        let snap = snapshot_from_inspect(&value, &[]).unwrap();
        assert!(snap.env.is_empty());
        assert!(snap.command.is_empty());
        assert!(snap.labels.is_empty());
        assert!(snap.ports.is_empty());
    }

    #[test]
    fn inspect_without_id_is_parse_error() {
        let value = serde_json::json!({"Name": "/x"});
        assert!(matches!(
            snapshot_from_inspect(&value, &[]),
            Err(EngineError::Parse(_))
        ));
    }

    #[test]
    fn ps_lines_are_parsed() {
        let out = r#"{"ID":"aaa","Names":"web","Image":"nginx","State":"running"}
{"ID":"bbb","Names":"db,db-alias","Image":"postgres:16","State":"exited"}
"#;
        let rows = parse_ps_lines(out).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "db");
        assert_eq!(rows[1].status, ContainerStatus::Exited);
    }

    #[test]
    fn image_inspect_is_parsed() {
        let values: Vec<Value> = serde_json::from_str(
            r#"[{"Id":"sha256:aa","RepoTags":["nginx:1.25","nginx:latest"]},{"Id":"sha256:bb","RepoTags":[]}]"#,
        )
        .unwrap();
        let images = images_from_inspect(&values);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].tags.len(), 2);
        assert!(images[1].is_untagged());
    }

    #[test]
    fn create_args_cover_all_parameters() {
        let mut env = BTreeMap::new();
        env.insert("MODE".to_owned(), "prod".to_owned());
        let mut ports = BTreeMap::new();
        ports.insert("80/tcp".to_owned(), 8080);
        let params = CreateParams {
            image: "nginx:1.25".to_owned(),
            name: "web-restored".to_owned(),
            env,
            volumes: vec![VolumeSpec {
                source: "/srv/www".to_owned(),
                target: "/usr/share/nginx/html".to_owned(),
                mode: "rw".to_owned(),
            }],
            ports,
            labels: BTreeMap::new(),
            command: vec!["nginx".to_owned()],
        };
        let args = create_args(&params);
        assert_eq!(
            args,
            vec![
                "--name",
                "web-restored",
                "--env",
                "MODE=prod",
                "--volume",
                "/srv/www:/usr/share/nginx/html:rw",
                "--publish",
                "8080:80/tcp",
                "nginx:1.25",
                "nginx",
            ]
        );
    }

    #[test]
    fn classify_known_stderr() {
        let status = std::process::Command::new("false").status().unwrap();
        assert!(classify(
            "x".to_owned(),
            status,
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock"
        )
        .is_unavailable());
        assert!(matches!(
            classify("x".to_owned(), status, "Error: No such container: web"),
            EngineError::ContainerNotFound(_)
        ));
        assert!(matches!(
            classify("x".to_owned(), status, "Error: No such image: nginx:9"),
            EngineError::ImageNotFound(_)
        ));
        assert!(matches!(
            classify(
                "x".to_owned(),
                status,
                "Conflict. The container name \"/web\" is already in use"
            ),
            EngineError::Conflict(_)
        ));
        assert!(matches!(
            classify("x".to_owned(), status, "something else"),
            EngineError::CommandFailed { .. }
        ));
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let engine = DockerCliEngine::new("dockvault-no-such-binary", Duration::from_secs(5));
        assert!(engine.ping().unwrap_err().is_unavailable());
    }

    #[test]
    fn slow_command_hits_deadline() {
        // `sleep` stands in for a hung engine call
        let engine = DockerCliEngine::new("sleep", Duration::from_millis(200));
        let err = engine.run(&["5"]).unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
    }
}
