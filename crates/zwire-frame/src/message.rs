//! Message types and message kinds.
//!
//! Both enumerations are closed: every byte value decodes, and values the
//! driver does not know land in `Unknown(u8)` so matches stay exhaustive.

/// Direction byte of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Host-to-controller request, or controller-initiated callback/notification.
    Request,
    /// Immediate answer to a request.
    Response,
    /// Any other type byte.
    Unknown(u8),
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => MessageType::Request,
            0x01 => MessageType::Response,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Request => 0x00,
            MessageType::Response => 0x01,
            MessageType::Unknown(other) => other,
        }
    }
}

/// How the controller completes a request of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackShape {
    /// No callback. The request is answered by a response or not at all.
    None,
    /// The controller reports progress only through callbacks.
    CallbackOnly,
    /// An immediate response says whether the request was accepted; the
    /// callback follows later.
    ResponseThenCallback,
}

/// Where an unsolicited frame of a given kind is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Device-initiated notification from the given node.
    Device(u8),
    /// The controller (re)started.
    Startup,
    /// Delivered to handlers registered for the message kind.
    Function,
}

/// Message id (function) of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionType {
    SerialApiGetInitData,
    ApplicationCommandHandler,
    GetControllerCapabilities,
    SerialApiGetCapabilities,
    SerialApiSoftReset,
    SerialApiStarted,
    SendData,
    GetVersion,
    MemoryGetId,
    GetNodeProtocolInfo,
    SetDefault,
    ApplicationUpdate,
    AddNodeToNetwork,
    RemoveNodeFromNetwork,
    RequestNodeInfo,
    BridgeApplicationCommandHandler,
    SendDataBridge,
    Unknown(u8),
}

impl From<u8> for FunctionType {
    fn from(value: u8) -> Self {
        match value {
            0x02 => FunctionType::SerialApiGetInitData,
            0x04 => FunctionType::ApplicationCommandHandler,
            0x05 => FunctionType::GetControllerCapabilities,
            0x07 => FunctionType::SerialApiGetCapabilities,
            0x08 => FunctionType::SerialApiSoftReset,
            0x0A => FunctionType::SerialApiStarted,
            0x13 => FunctionType::SendData,
            0x15 => FunctionType::GetVersion,
            0x20 => FunctionType::MemoryGetId,
            0x41 => FunctionType::GetNodeProtocolInfo,
            0x42 => FunctionType::SetDefault,
            0x49 => FunctionType::ApplicationUpdate,
            0x4A => FunctionType::AddNodeToNetwork,
            0x4B => FunctionType::RemoveNodeFromNetwork,
            0x60 => FunctionType::RequestNodeInfo,
            0xA8 => FunctionType::BridgeApplicationCommandHandler,
            0xA9 => FunctionType::SendDataBridge,
            other => FunctionType::Unknown(other),
        }
    }
}

impl From<FunctionType> for u8 {
    fn from(value: FunctionType) -> Self {
        match value {
            FunctionType::SerialApiGetInitData => 0x02,
            FunctionType::ApplicationCommandHandler => 0x04,
            FunctionType::GetControllerCapabilities => 0x05,
            FunctionType::SerialApiGetCapabilities => 0x07,
            FunctionType::SerialApiSoftReset => 0x08,
            FunctionType::SerialApiStarted => 0x0A,
            FunctionType::SendData => 0x13,
            FunctionType::GetVersion => 0x15,
            FunctionType::MemoryGetId => 0x20,
            FunctionType::GetNodeProtocolInfo => 0x41,
            FunctionType::SetDefault => 0x42,
            FunctionType::ApplicationUpdate => 0x49,
            FunctionType::AddNodeToNetwork => 0x4A,
            FunctionType::RemoveNodeFromNetwork => 0x4B,
            FunctionType::RequestNodeInfo => 0x60,
            FunctionType::BridgeApplicationCommandHandler => 0xA8,
            FunctionType::SendDataBridge => 0xA9,
            FunctionType::Unknown(other) => other,
        }
    }
}

impl FunctionType {
    /// Human-readable name for logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            FunctionType::SerialApiGetInitData => "SerialApiGetInitData",
            FunctionType::ApplicationCommandHandler => "ApplicationCommandHandler",
            FunctionType::GetControllerCapabilities => "GetControllerCapabilities",
            FunctionType::SerialApiGetCapabilities => "SerialApiGetCapabilities",
            FunctionType::SerialApiSoftReset => "SerialApiSoftReset",
            FunctionType::SerialApiStarted => "SerialApiStarted",
            FunctionType::SendData => "SendData",
            FunctionType::GetVersion => "GetVersion",
            FunctionType::MemoryGetId => "MemoryGetId",
            FunctionType::GetNodeProtocolInfo => "GetNodeProtocolInfo",
            FunctionType::SetDefault => "SetDefault",
            FunctionType::ApplicationUpdate => "ApplicationUpdate",
            FunctionType::AddNodeToNetwork => "AddNodeToNetwork",
            FunctionType::RemoveNodeFromNetwork => "RemoveNodeFromNetwork",
            FunctionType::RequestNodeInfo => "RequestNodeInfo",
            FunctionType::BridgeApplicationCommandHandler => "BridgeApplicationCommandHandler",
            FunctionType::SendDataBridge => "SendDataBridge",
            FunctionType::Unknown(_) => "UNKNOWN",
        }
    }

    /// How a request of this kind is completed.
    pub fn callback_shape(self) -> CallbackShape {
        match self {
            FunctionType::SendData
            | FunctionType::SendDataBridge
            | FunctionType::RequestNodeInfo => CallbackShape::ResponseThenCallback,
            FunctionType::SetDefault
            | FunctionType::AddNodeToNetwork
            | FunctionType::RemoveNodeFromNetwork => CallbackShape::CallbackOnly,
            FunctionType::SerialApiGetInitData
            | FunctionType::ApplicationCommandHandler
            | FunctionType::GetControllerCapabilities
            | FunctionType::SerialApiGetCapabilities
            | FunctionType::SerialApiSoftReset
            | FunctionType::SerialApiStarted
            | FunctionType::GetVersion
            | FunctionType::MemoryGetId
            | FunctionType::GetNodeProtocolInfo
            | FunctionType::ApplicationUpdate
            | FunctionType::BridgeApplicationCommandHandler
            | FunctionType::Unknown(_) => CallbackShape::None,
        }
    }

    /// Where an unsolicited frame of this kind goes, given its parameters.
    ///
    /// Device notifications whose parameters are too short to carry a node
    /// id fall back to [`Routing::Function`].
    pub fn routing(self, parameters: &[u8]) -> Routing {
        let node_at = |index: usize| {
            parameters
                .get(index)
                .map_or(Routing::Function, |node| Routing::Device(*node))
        };
        match self {
            FunctionType::ApplicationCommandHandler | FunctionType::ApplicationUpdate => {
                node_at(1)
            }
            FunctionType::BridgeApplicationCommandHandler => node_at(2),
            FunctionType::SerialApiStarted => Routing::Startup,
            FunctionType::SerialApiGetInitData
            | FunctionType::GetControllerCapabilities
            | FunctionType::SerialApiGetCapabilities
            | FunctionType::SerialApiSoftReset
            | FunctionType::SendData
            | FunctionType::GetVersion
            | FunctionType::MemoryGetId
            | FunctionType::GetNodeProtocolInfo
            | FunctionType::SetDefault
            | FunctionType::AddNodeToNetwork
            | FunctionType::RemoveNodeFromNetwork
            | FunctionType::RequestNodeInfo
            | FunctionType::SendDataBridge
            | FunctionType::Unknown(_) => Routing::Function,
        }
    }
}

impl std::fmt::Display for FunctionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), u8::from(*self))
    }
}
