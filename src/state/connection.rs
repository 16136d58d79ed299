//! Connection startup and authentication state machine.

use tracing::debug;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, ParameterStatus, ReadyForQuery, msg_type,
};
use crate::protocol::frontend::auth::{SCRAM_SHA_256, ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::action::Action;
use super::{StateMachine, parse_async_message, unexpected};

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingAuth,
    SaslInProgress,
    WaitingReady,
    Ready,
    Failed,
}

/// Drives StartupMessage through authentication to the first ReadyForQuery.
///
/// Supports cleartext, MD5 and SCRAM-SHA-256 passwords. Any other method
/// fails with [`Error::AuthNotSupported`]. An ErrorResponse during startup
/// is terminal: the server closes the session right after sending it.
pub struct ConnectionStateMachine {
    state: ConnectionState,
    options: Opts,
    backend_key: Option<(u32, u32)>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    scram_client: Option<ScramClient>,
}

impl ConnectionStateMachine {
    pub fn new(options: Opts) -> Self {
        Self {
            state: ConnectionState::Initial,
            options,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            scram_client: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Process id and secret key, for cancellation.
    pub fn backend_key(&self) -> Option<(u32, u32)> {
        self.backend_key
    }

    /// ParameterStatus values reported during startup.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("password required but not provided".into()))
    }

    fn write_startup_message(&self, buf: &mut Vec<u8>) {
        let mut params: Vec<(&str, &str)> = vec![
            ("user", &self.options.user),
            ("client_encoding", "UTF8"),
        ];
        if let Some(db) = &self.options.database {
            params.push(("database", db));
        }
        if let Some(app) = &self.options.application_name {
            params.push(("application_name", app));
        }
        for (name, value) in &self.options.params {
            params.push((name, value));
        }
        write_startup(buf, &params);
    }

    fn handle_auth(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(unexpected(buffer_set.type_byte, "authentication"));
        }
        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;
        let buf = &mut buffer_set.write_buffer;
        buf.clear();

        match auth {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                write_password(buf, self.password()?);
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.options.user, self.password()?, &salt);
                write_password(buf, &hashed);
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "no supported SASL mechanism, server offers {mechanisms:?}"
                    )));
                }
                let scram = ScramClient::new(self.password()?);
                write_sasl_initial_response(
                    buf,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );
                self.scram_client = Some(scram);
                self.state = ConnectionState::SaslInProgress;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::SaslContinue { .. }
            | AuthenticationMessage::SaslFinal { .. } => {
                Err(Error::Protocol("SASL message outside of a SASL exchange".into()))
            }
            AuthenticationMessage::Other(code) => Err(Error::AuthNotSupported(code)),
        }
    }

    fn handle_sasl(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(unexpected(buffer_set.type_byte, "SASL exchange"));
        }
        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;
        let scram = self
            .scram_client
            .as_mut()
            .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;
        let text = |data: &[u8]| {
            simdutf8::compat::from_utf8(data)
                .map(str::to_string)
                .map_err(|e| Error::Auth(format!("invalid SASL message: {e}")))
        };

        match auth {
            AuthenticationMessage::SaslContinue { data } => {
                let client_final = scram.process_server_first(&text(data)?)?;
                buffer_set.write_buffer.clear();
                write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes());
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::SaslFinal { data } => {
                scram.verify_server_final(&text(data)?)?;
                self.state = ConnectionState::WaitingAuth;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!("unexpected SASL message: {other:?}"))),
        }
    }

    fn handle_ready(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.backend_key = Some((key.process_id(), key.secret()));
                Ok(Action::ReadMessage)
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                self.server_params
                    .push((param.name.to_string(), param.value.to_string()));
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(payload)?.status;
                self.state = ConnectionState::Ready;
                Ok(Action::Finished)
            }
            other => Err(unexpected(other, "startup")),
        }
    }
}

impl StateMachine for ConnectionStateMachine {
    fn start(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        self.write_startup_message(&mut buffer_set.write_buffer);
        self.state = ConnectionState::WaitingAuth;
        Ok(Action::WriteAndReadMessage)
    }

    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let result = match buffer_set.type_byte {
            msg_type::ERROR_RESPONSE => {
                Err(ErrorResponse::parse(&buffer_set.read_buffer)?.into_error())
            }
            msg_type::NOTICE_RESPONSE | msg_type::NOTIFICATION_RESPONSE => {
                parse_async_message(buffer_set.type_byte, &buffer_set.read_buffer)
                    .map(Action::HandleAsyncMessageAndReadMessage)
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                debug!("server negotiated an older protocol minor version");
                Ok(Action::ReadMessage)
            }
            _ => match self.state {
                ConnectionState::WaitingAuth => self.handle_auth(buffer_set),
                ConnectionState::SaslInProgress => self.handle_sasl(buffer_set),
                ConnectionState::WaitingReady => self.handle_ready(buffer_set),
                state => Err(Error::Protocol(format!(
                    "message '{}' in connection state {state:?}",
                    buffer_set.type_byte as char
                ))),
            },
        };
        if result.is_err() {
            self.state = ConnectionState::Failed;
        }
        result
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}
