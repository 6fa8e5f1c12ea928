use std::{io, time::Duration};

use crate::{
    error::{Error, Result},
    socket::SocketHandle,
};

/// Shortest deadline the OS is asked for; anything smaller would read as
/// "no deadline" once truncated to a timeval.
const MIN_DEADLINE: Duration = Duration::from_micros(1);

/// Converts a caller-supplied timeout in seconds to a socket deadline.
///
/// `0` and `+inf` mean "block without a deadline". Negative and NaN values
/// are rejected.
pub fn deadline(seconds: f64) -> io::Result<Option<Duration>> {
    if seconds.is_nan() || seconds < 0.0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid timeout {seconds}"),
        ));
    }
    if seconds == 0.0 || seconds.is_infinite() {
        return Ok(None);
    }
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    Ok(Some(duration.max(MIN_DEADLINE)))
}

/// Applies `seconds` as both the receive and send deadline of `handle`.
///
/// The deadline holds for every later blocking call on the handle until it
/// is changed again.
pub fn set_timeout(handle: &SocketHandle, seconds: f64) -> Result<()> {
    let fail = |source| Error::TimeoutConfig { seconds, source };

    let limit = deadline(seconds).map_err(fail)?;
    let socket = handle.require_socket().map_err(fail)?;
    socket.set_read_timeout(limit).map_err(fail)?;
    socket.set_write_timeout(limit).map_err(fail)?;
    tracing::trace!(?limit, "socket deadline applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use socket2::{Domain, Protocol, Socket, Type};

    use super::*;
    use crate::{error::ErrorKind, socket::SocketRole};

    fn handle() -> SocketHandle {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        SocketHandle::new(socket, SocketRole::Connected)
    }

    #[test]
    fn zero_and_infinity_disable_the_deadline() {
        assert_eq!(deadline(0.0).unwrap(), None);
        assert_eq!(deadline(f64::INFINITY).unwrap(), None);
    }

    #[test]
    fn fractional_seconds_are_kept() {
        assert_eq!(deadline(0.25).unwrap(), Some(Duration::from_millis(250)));
        assert_eq!(deadline(1e-9).unwrap(), Some(MIN_DEADLINE));
    }

    #[test]
    fn negative_and_nan_are_rejected() {
        assert!(deadline(-1.0).is_err());
        assert!(deadline(f64::NAN).is_err());
    }

    #[test]
    fn applies_to_both_directions() {
        let handle = handle();
        set_timeout(&handle, 1.5).unwrap();
        let socket = handle.socket().unwrap();
        assert_eq!(socket.read_timeout().unwrap(), Some(Duration::from_millis(1500)));
        assert_eq!(socket.write_timeout().unwrap(), Some(Duration::from_millis(1500)));

        set_timeout(&handle, 0.0).unwrap();
        assert_eq!(socket.read_timeout().unwrap(), None);
    }

    #[test]
    fn closed_handle_is_a_config_error() {
        let handle = handle();
        handle.close();
        let err = set_timeout(&handle, 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimeoutConfig);
    }
}
