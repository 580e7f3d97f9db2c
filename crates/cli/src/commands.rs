use anyhow::{Context, Result};
use gsmd::modem_core::operation::ContextRequest;
use gsmd::modem_core::{ModemEvent, ModemHandle};
use serde::Serialize;
use tabled::{Table, Tabled};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::Command;

#[derive(Tabled)]
struct Row {
    field: &'static str,
    value: String,
}

fn row(field: &'static str, value: impl Into<String>) -> Row {
    Row {
        field,
        value: value.into(),
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub async fn run(modem: &ModemHandle, command: Command) -> Result<()> {
    match command {
        Command::Monitor => monitor(modem).await,
        Command::Status => status(modem).await,
        Command::Info => {
            let info = modem.device_info().await?;
            let rows = vec![
                row("manufacturer", info.manufacturer),
                row("model", info.model),
                row("revision", info.revision),
                row("imei", info.imei),
                row("imsi", modem.imsi().await.unwrap_or_default()),
            ];
            println!("{}", Table::new(rows));
            Ok(())
        }
        Command::Pin { code } => {
            modem.send_auth_code(code).await.context("SIM rejected the code")?;
            println!("{}", modem.auth_status().await?);
            Ok(())
        }
        Command::Register => {
            modem.register().await?;
            print_json(&modem.registration_status().await?)
        }
        Command::Scan => {
            info!("Scanning, this takes a while");
            print_json(&modem.list_providers().await?)
        }
        Command::Operator { code } => {
            modem
                .register_with_provider(code.as_str())
                .await
                .with_context(|| format!("operator {} refused registration", code))?;
            print_json(&modem.registration_status().await?)
        }
        Command::Puk { puk, pin } => {
            modem.unlock(puk, pin).await.context("SIM rejected the PUK")?;
            println!("{}", modem.auth_status().await?);
            Ok(())
        }
        Command::Phonebook => print_json(&modem.phonebook().await?),
        Command::Messages { status } => print_json(&modem.messages(status).await?),
        Command::Dial { number } => {
            let call = modem.dial(number).await?;
            println!("call {} dialled, Ctrl-C hangs up", call);
            monitor(modem).await?;
            modem.hang_up(Some(call)).await?;
            Ok(())
        }
        Command::Calls => print_json(&modem.call_status().await?),
        Command::Hangup { call } => Ok(modem.hang_up(call).await?),
        Command::Connect { apn, user, password } => {
            let params = modem
                .activate_context(ContextRequest { apn, user, password })
                .await
                .context("context activation failed")?;
            print_json(&params)?;
            monitor(modem).await?;
            if modem.snapshot().context.is_active() {
                modem.deactivate_context().await?;
            }
            Ok(())
        }
        Command::Sms { number, text } => {
            let reference = modem.send_message(number, text).await?;
            println!("sent, reference {}", reference);
            Ok(())
        }
        Command::Antenna { on } => Ok(modem.set_antenna_power(on).await?),
        Command::At { command } => {
            for line in modem.raw_command(command).await? {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

async fn status(modem: &ModemHandle) -> Result<()> {
    let auth = modem.auth_status().await?;
    let network = modem.registration_status().await?;
    let snapshot = modem.snapshot();

    let mut rows = vec![
        row("sim", auth),
        row("registration", format!("{:?}", network.registration)),
        row("operator", network.operator.unwrap_or_default()),
        row("roaming", network.roaming.to_string()),
        row(
            "signal",
            network.strength.map(|s| format!("{}%", s)).unwrap_or_default(),
        ),
        row("context", format!("{:?}", snapshot.context)),
    ];
    for call in &snapshot.calls {
        rows.push(row("call", format!("{} {:?} {:?}", call.id, call.status, call.direction)));
    }
    println!("{}", Table::new(rows));
    Ok(())
}

/// Print events as JSON lines until Ctrl-C or until the engine closes
async fn monitor(modem: &ModemHandle) -> Result<()> {
    let mut events = modem.subscribe();
    print_json(&modem.snapshot())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_json(&event)?;
                    if event == ModemEvent::Closed {
                        return Ok(());
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Dropped {} events", missed),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}
