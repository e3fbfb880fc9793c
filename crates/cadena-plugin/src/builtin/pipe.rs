//! Pipe node: stream samples through a child process.
//!
//! The configured command is spawned once at instantiation. Audio samples
//! go to its stdin and come back from its stdout as raw little-endian
//! `f32`, with both directions serviced by helper threads over bounded
//! channels so the audio path never blocks on the child. When the child
//! has not produced enough samples yet the output is padded with silence,
//! matching the non-blocking reads of the original.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};

use serde::Deserialize;

use crate::builtin::Desc;
use crate::descriptor::{DescriptorFlags, Instance, InstantiateCtx, PortDef, Ports};
use crate::error::PluginError;

#[derive(Debug, Deserialize)]
struct Config {
    command: CommandSpec,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    fn argv(&self) -> Vec<String> {
        match self {
            Self::Line(s) => s.split_whitespace().map(str::to_owned).collect(),
            Self::Argv(v) => v.clone(),
        }
    }
}

struct Pipe {
    child: Child,
    to_child: SyncSender<Vec<f32>>,
    from_child: Receiver<Vec<f32>>,
    pending: Vec<f32>,
}

impl Instance for Pipe {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0])
        else {
            return;
        };

        match self.to_child.try_send(input[..n_samples].to_vec()) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("pipe child is gone, writing silence");
            }
        }

        while self.pending.len() < n_samples {
            match self.from_child.try_recv() {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(_) => break,
            }
        }

        let have = self.pending.len().min(n_samples);
        out[..have].copy_from_slice(&self.pending[..have]);
        out[have..n_samples].fill(0.0);
        self.pending.drain(..have);
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn make(ctx: &InstantiateCtx) -> Result<Box<dyn Instance>, PluginError> {
    let config: Config = crate::builtin::require_config("pipe", ctx)?;
    let argv = config.command.argv();
    if argv.is_empty() {
        return Err(PluginError::bad_config(
            "pipe: command must be given and can not be empty",
        ));
    }
    tracing::info!(?argv, "pipe: spawning");

    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| PluginError::bad_config(format!("pipe: spawn '{}': {e}", argv[0])))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PluginError::bad_config("pipe: no child stdin"))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| PluginError::bad_config("pipe: no child stdout"))?;

    let (to_child, writer_rx) = std::sync::mpsc::sync_channel::<Vec<f32>>(8);
    std::thread::Builder::new()
        .name("cadena-pipe-writer".into())
        .spawn(move || {
            while let Ok(chunk) = writer_rx.recv() {
                let mut bytes = Vec::with_capacity(chunk.len() * 4);
                for s in chunk {
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
                if stdin.write_all(&bytes).is_err() {
                    break;
                }
            }
        })?;

    let (reader_tx, from_child) = std::sync::mpsc::sync_channel::<Vec<f32>>(8);
    std::thread::Builder::new()
        .name("cadena-pipe-reader".into())
        .spawn(move || {
            let mut buf = [0u8; 4096];
            let mut carry: Vec<u8> = Vec::new();
            loop {
                let n = match stdout.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                carry.extend_from_slice(&buf[..n]);
                let complete = carry.len() / 4 * 4;
                let samples: Vec<f32> = carry[..complete]
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                carry.drain(..complete);
                if reader_tx.send(samples).is_err() {
                    break;
                }
            }
        })?;

    Ok(Box::new(Pipe {
        child,
        to_child,
        from_child,
        pending: Vec::new(),
    }))
}

static PIPE_PORTS: &[PortDef] = &[PortDef::audio_in(0, "In"), PortDef::audio_out(1, "Out")];

pub(crate) static PIPE: Desc = Desc {
    name: "pipe",
    flags: DescriptorFlags::SUPPORTS_NULL_DATA,
    ports: PIPE_PORTS,
    make,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Plugin;
    use serde_json::json;

    #[test]
    fn cat_echoes_samples() {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("pipe").unwrap();
        let mut inst = desc
            .instantiate(&InstantiateCtx::new(
                48_000,
                0,
                Some(json!({ "command": "cat" })),
            ))
            .unwrap();

        let input = [0.25f32, -0.5, 0.75, 1.0];
        let mut got = Vec::new();
        // several runs so the round trip through the child completes
        for _ in 0..200 {
            let mut out = [0.0f32; 4];
            {
                let audio_in = [Some(&input[..])];
                let mut out_slot: Option<&mut [f32]> = Some(&mut out);
                let outs = std::slice::from_mut(&mut out_slot);
                let mut notify: [f32; 0] = [];
                let mut ports = Ports {
                    audio_in: &audio_in,
                    audio_out: outs,
                    control: &[],
                    notify: &mut notify,
                };
                inst.run(&mut ports, 4);
            }
            got.extend_from_slice(&out);
            if got.iter().any(|&s| s != 0.0) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        // the echoed stream eventually contains our samples
        let flat: Vec<f32> = got.into_iter().filter(|&s| s != 0.0).collect();
        assert!(flat.starts_with(&[0.25, -0.5]), "got {flat:?}");
    }

    #[test]
    fn empty_command_is_rejected() {
        let plugin = crate::builtin::BuiltinPlugin::new();
        let desc = plugin.make_descriptor("pipe").unwrap();
        let ctx = InstantiateCtx::new(48_000, 0, Some(json!({ "command": "" })));
        assert!(desc.instantiate(&ctx).is_err());
    }
}
