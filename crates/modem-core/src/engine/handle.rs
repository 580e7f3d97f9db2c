//! Caller side of the engine

use crate::error::{ModemError, ModemResult};
use crate::events::ModemEvent;
use crate::operation::{
    ContextRequest, DeviceFeatures, DeviceInfo, DialParams, MessageParams, MessageStatus, NetworkProvider, Operation,
    OperationId, OperationOutput, PhonebookEntry, StoredMessage,
};
use crate::state::{CallId, CallInfo, CallKind, ConnectionSnapshot, ContextParams, NetworkStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

pub(crate) type Completion = oneshot::Sender<ModemResult<OperationOutput>>;

/// Messages from handles to the engine task
#[derive(Debug)]
pub(crate) enum EngineRequest {
    Invoke {
        id: OperationId,
        operation: Operation,
        completion: Completion,
    },
    Cancel {
        id: OperationId,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// An operation the engine accepted
///
/// Settles exactly once: with the operation's result, with
/// [`ModemError::Cancelled`] after [`cancel`](Self::cancel), or with a
/// transport error when the engine goes away.
#[derive(Debug)]
pub struct PendingOperation {
    id: OperationId,
    result: oneshot::Receiver<ModemResult<OperationOutput>>,
    requests: mpsc::Sender<EngineRequest>,
}

impl PendingOperation {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub async fn wait(self) -> ModemResult<OperationOutput> {
        self.result.await.unwrap_or_else(|_| Err(ModemError::disconnected()))
    }

    /// Give up on the operation
    ///
    /// Returns [`ModemError::Cancelled`], or the real result when the
    /// operation settled before the engine saw the cancellation.
    pub async fn cancel(self) -> ModemResult<OperationOutput> {
        let _ = self.requests.send(EngineRequest::Cancel { id: self.id }).await;
        self.wait().await
    }
}

/// Cloneable handle to a running engine
#[derive(Debug, Clone)]
pub struct ModemHandle {
    requests: mpsc::Sender<EngineRequest>,
    events: broadcast::Sender<ModemEvent>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    next_id: Arc<AtomicU64>,
}

fn unexpected(output: OperationOutput) -> ModemError {
    ModemError::internal(format!("unexpected operation output {:?}", output))
}

impl ModemHandle {
    pub(crate) fn new(
        requests: mpsc::Sender<EngineRequest>,
        events: broadcast::Sender<ModemEvent>,
        snapshot: watch::Receiver<ConnectionSnapshot>,
        next_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            requests,
            events,
            snapshot,
            next_id,
        }
    }

    /// Submit an operation without waiting for it
    pub async fn invoke(&self, operation: Operation) -> ModemResult<PendingOperation> {
        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (completion, result) = oneshot::channel();
        self.requests
            .send(EngineRequest::Invoke {
                id,
                operation,
                completion,
            })
            .await
            .map_err(|_| ModemError::disconnected())?;
        Ok(PendingOperation {
            id,
            result,
            requests: self.requests.clone(),
        })
    }

    /// Submit an operation and wait for its result
    pub async fn execute(&self, operation: Operation) -> ModemResult<OperationOutput> {
        self.invoke(operation).await?.wait().await
    }

    async fn execute_done(&self, operation: Operation) -> ModemResult<()> {
        match self.execute(operation).await? {
            OperationOutput::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn dial(&self, number: impl Into<String>) -> ModemResult<CallId> {
        let params = DialParams {
            number: number.into(),
            kind: CallKind::Voice,
        };
        match self.execute(Operation::Dial(params)).await? {
            OperationOutput::Call(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    /// Accept `call`, or the ringing call
    pub async fn answer(&self, call: Option<CallId>) -> ModemResult<CallId> {
        match self.execute(Operation::Answer { call }).await? {
            OperationOutput::Call(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    /// Release `call`, or every call
    pub async fn hang_up(&self, call: Option<CallId>) -> ModemResult<()> {
        self.execute_done(Operation::HangUp { call }).await
    }

    pub async fn call_status(&self) -> ModemResult<Vec<CallInfo>> {
        match self.execute(Operation::GetCallStatus).await? {
            OperationOutput::Calls(calls) => Ok(calls),
            other => Err(unexpected(other)),
        }
    }

    pub async fn activate_context(&self, request: ContextRequest) -> ModemResult<ContextParams> {
        match self.execute(Operation::ActivateContext(request)).await? {
            OperationOutput::Context(params) => Ok(params),
            other => Err(unexpected(other)),
        }
    }

    pub async fn deactivate_context(&self) -> ModemResult<()> {
        self.execute_done(Operation::DeactivateContext).await
    }

    pub async fn send_auth_code(&self, code: impl Into<String>) -> ModemResult<()> {
        self.execute_done(Operation::SendAuthCode { code: code.into() }).await
    }

    pub async fn auth_status(&self) -> ModemResult<String> {
        match self.execute(Operation::GetAuthStatus).await? {
            OperationOutput::AuthStatus(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn registration_status(&self) -> ModemResult<NetworkStatus> {
        match self.execute(Operation::GetRegistrationStatus).await? {
            OperationOutput::Network(network) => Ok(network),
            other => Err(unexpected(other)),
        }
    }

    pub async fn register(&self) -> ModemResult<()> {
        self.execute_done(Operation::Register).await
    }

    /// Signal strength in percent
    pub async fn signal_strength(&self) -> ModemResult<u8> {
        match self.execute(Operation::GetSignalStrength).await? {
            OperationOutput::SignalStrength(percent) => Ok(percent),
            other => Err(unexpected(other)),
        }
    }

    pub async fn device_info(&self) -> ModemResult<DeviceInfo> {
        match self.execute(Operation::GetDeviceInfo).await? {
            OperationOutput::DeviceInfo(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_antenna_power(&self, on: bool) -> ModemResult<()> {
        self.execute_done(Operation::SetAntennaPower { on }).await
    }

    /// Send a text message, returning its reference
    pub async fn send_message(&self, number: impl Into<String>, text: impl Into<String>) -> ModemResult<u16> {
        let params = MessageParams {
            number: number.into(),
            text: text.into(),
        };
        match self.execute(Operation::SendMessage(params)).await? {
            OperationOutput::MessageReference(reference) => Ok(reference),
            other => Err(unexpected(other)),
        }
    }

    pub async fn raw_command(&self, command: impl Into<String>) -> ModemResult<Vec<String>> {
        match self.execute(Operation::RawCommand { command: command.into() }).await? {
            OperationOutput::Lines(lines) => Ok(lines),
            other => Err(unexpected(other)),
        }
    }

    /// Scan for networks; may take more than a minute
    pub async fn list_providers(&self) -> ModemResult<Vec<NetworkProvider>> {
        match self.execute(Operation::ListProviders).await? {
            OperationOutput::Providers(providers) => Ok(providers),
            other => Err(unexpected(other)),
        }
    }

    pub async fn unregister(&self) -> ModemResult<()> {
        self.execute_done(Operation::Unregister).await
    }

    pub async fn register_with_provider(&self, code: impl Into<String>) -> ModemResult<()> {
        self.execute_done(Operation::RegisterWithProvider { code: code.into() }).await
    }

    pub async fn imsi(&self) -> ModemResult<String> {
        match self.execute(Operation::GetImsi).await? {
            OperationOutput::Imsi(imsi) => Ok(imsi),
            other => Err(unexpected(other)),
        }
    }

    pub async fn change_auth_code(&self, old: impl Into<String>, new: impl Into<String>) -> ModemResult<()> {
        self.execute_done(Operation::ChangeAuthCode {
            old: old.into(),
            new: new.into(),
        })
        .await
    }

    /// Unblock the SIM with its PUK
    pub async fn unlock(&self, puk: impl Into<String>, new_pin: impl Into<String>) -> ModemResult<()> {
        self.execute_done(Operation::Unlock {
            puk: puk.into(),
            new_pin: new_pin.into(),
        })
        .await
    }

    pub async fn antenna_power(&self) -> ModemResult<bool> {
        match self.execute(Operation::GetAntennaPower).await? {
            OperationOutput::AntennaPower(on) => Ok(on),
            other => Err(unexpected(other)),
        }
    }

    pub async fn features(&self) -> ModemResult<DeviceFeatures> {
        match self.execute(Operation::GetFeatures).await? {
            OperationOutput::Features(features) => Ok(features),
            other => Err(unexpected(other)),
        }
    }

    pub async fn service_center_number(&self) -> ModemResult<String> {
        match self.execute(Operation::GetServiceCenterNumber).await? {
            OperationOutput::ServiceCenter(number) => Ok(number),
            other => Err(unexpected(other)),
        }
    }

    pub async fn phonebook(&self) -> ModemResult<Vec<PhonebookEntry>> {
        match self.execute(Operation::RetrievePhonebook).await? {
            OperationOutput::Phonebook(entries) => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    /// Stored messages with `status`, or all of them
    pub async fn messages(&self, status: Option<MessageStatus>) -> ModemResult<Vec<StoredMessage>> {
        match self.execute(Operation::RetrieveMessagebook { status }).await? {
            OperationOutput::Messages(messages) => Ok(messages),
            other => Err(unexpected(other)),
        }
    }

    /// Events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.events.subscribe()
    }

    /// Current state
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified whenever the state changes
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    /// Whether the engine has stopped
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// Stop the engine; pending operations fail with a transport error
    pub async fn shutdown(&self) -> ModemResult<()> {
        let (done, stopped) = oneshot::channel();
        if self.requests.send(EngineRequest::Shutdown { done }).await.is_err() {
            return Ok(());
        }
        let _ = stopped.await;
        Ok(())
    }
}
