//! Request descriptions for callback exchanges and response inspection.

use bytes::{BufMut, Bytes, BytesMut};
use zwire_frame::{CallbackShape, DataFrame, FunctionType};

use crate::session::SessionId;

/// A request that completes through a session-tagged callback.
///
/// The session id is appended as the last parameter byte when the frame is
/// built; the controller echoes it as the first parameter byte of the
/// callback. By default the callback carries the request's own function and
/// an immediate response is awaited only for kinds that send one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRequest {
    function: FunctionType,
    parameters: Bytes,
    callback_function: FunctionType,
    await_response: bool,
}

impl CallbackRequest {
    pub fn new(function: FunctionType, parameters: impl Into<Bytes>) -> Self {
        Self {
            function,
            parameters: parameters.into(),
            callback_function: function,
            await_response: function.callback_shape() == CallbackShape::ResponseThenCallback,
        }
    }

    /// Expect the callback under a different function than the request.
    pub fn with_callback_function(mut self, function: FunctionType) -> Self {
        self.callback_function = function;
        self
    }

    /// Override whether an accepting response must arrive before the callback.
    pub fn with_response(mut self, await_response: bool) -> Self {
        self.await_response = await_response;
        self
    }

    pub fn function(&self) -> FunctionType {
        self.function
    }

    pub fn callback_function(&self) -> FunctionType {
        self.callback_function
    }

    pub fn awaits_response(&self) -> bool {
        self.await_response
    }

    /// Parameters without the session byte.
    pub fn parameters(&self) -> &Bytes {
        &self.parameters
    }

    /// Request frame carrying `session` as its last parameter byte.
    pub fn to_frame(&self, session: Option<SessionId>) -> DataFrame {
        let mut parameters = BytesMut::with_capacity(self.parameters.len() + 1);
        parameters.extend_from_slice(&self.parameters);
        parameters.put_u8(SessionId::to_wire(session));
        DataFrame::request(self.function, parameters.freeze())
    }
}

/// Whether an immediate response accepts its request: the first parameter
/// byte is non-zero.
pub fn response_accepted(response: &DataFrame) -> bool {
    response.parameters().first().is_some_and(|status| *status != 0)
}

/// Session id carried in the first parameter byte of a callback, if any.
pub fn callback_session(frame: &DataFrame) -> Option<SessionId> {
    frame
        .parameters()
        .first()
        .and_then(|byte| SessionId::new(*byte))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_is_appended_last() {
        let request = CallbackRequest::new(
            FunctionType::SendData,
            Bytes::from_static(&[0x05, 0x02, 0x20, 0x02, 0x25]),
        );
        let frame = request.to_frame(SessionId::new(0x2A));
        assert_eq!(frame.function(), FunctionType::SendData);
        assert_eq!(
            frame.parameters().as_ref(),
            &[0x05, 0x02, 0x20, 0x02, 0x25, 0x2A]
        );
        assert_eq!(request.to_frame(None).parameters().last(), Some(&0));
    }

    #[test]
    fn defaults_follow_callback_shape() {
        assert!(CallbackRequest::new(FunctionType::SendData, Bytes::new()).awaits_response());
        assert!(!CallbackRequest::new(FunctionType::SetDefault, Bytes::new()).awaits_response());

        let custom = CallbackRequest::new(FunctionType::Unknown(0x51), Bytes::new())
            .with_callback_function(FunctionType::Unknown(0x52))
            .with_response(true);
        assert_eq!(custom.callback_function(), FunctionType::Unknown(0x52));
        assert!(custom.awaits_response());
    }

    #[test]
    fn acceptance_reads_first_parameter() {
        let accepted = DataFrame::response(FunctionType::SendData, Bytes::from_static(&[0x01]));
        let rejected = DataFrame::response(FunctionType::SendData, Bytes::from_static(&[0x00]));
        let empty = DataFrame::response(FunctionType::SendData, Bytes::new());
        assert!(response_accepted(&accepted));
        assert!(!response_accepted(&rejected));
        assert!(!response_accepted(&empty));
    }

    #[test]
    fn callback_session_ignores_zero() {
        let tagged = DataFrame::request(FunctionType::SendData, Bytes::from_static(&[0x07, 0x00]));
        let untagged = DataFrame::request(FunctionType::SendData, Bytes::from_static(&[0x00]));
        assert_eq!(callback_session(&tagged), SessionId::new(7));
        assert_eq!(callback_session(&untagged), None);
    }
}
