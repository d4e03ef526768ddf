//! Argument parsing for the `server` and `client` binaries.
//!
//! Neither binary pulls in a CLI-parsing crate: each takes a short,
//! fixed list of positional arguments, same as the original's
//! `sys.argv` handling, so hand-validating them is simpler than
//! describing them to a parser.

use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::err::Error;

pub struct ServerArgs {
    pub port: u16,
    pub window: u32,
}

pub fn server_usage(program: &str) -> String {
    format!("usage: {program} <port> <max_receive_window_in_packets>")
}

pub fn parse_server_args(args: &[String]) -> Result<ServerArgs, Error> {
    if args.len() != 2 {
        return Err(Error::WrongArgCount {
            expected: 2,
            got: args.len(),
        });
    }

    let port = parse_port(&args[0])?;
    let window = parse_window(&args[1])?;
    Ok(ServerArgs { port, window })
}

pub struct ClientArgs {
    pub peer: Ipv4Addr,
    pub port: u16,
    pub window: u32,
}

pub fn client_usage(program: &str) -> String {
    format!("usage: {program} <server_address> <port> <max_receive_window_in_packets>")
}

pub fn parse_client_args(args: &[String]) -> Result<ClientArgs, Error> {
    if args.len() != 3 {
        return Err(Error::WrongArgCount {
            expected: 3,
            got: args.len(),
        });
    }

    let peer = Ipv4Addr::from_str(&args[0])
        .map_err(|e| Error::InvalidAddress(args[0].clone(), e.to_string()))?;
    let port = parse_port(&args[1])?;
    let window = parse_window(&args[2])?;
    Ok(ClientArgs { peer, port, window })
}

fn parse_port(raw: &str) -> Result<u16, Error> {
    raw.parse::<u16>()
        .map_err(|e| Error::InvalidPort(raw.to_string(), e.to_string()))
}

fn parse_window(raw: &str) -> Result<u32, Error> {
    let window = raw
        .parse::<u32>()
        .map_err(|e| Error::InvalidWindow(raw.to_string(), e.to_string()))?;
    if window == 0 {
        return Err(Error::InvalidWindow(
            raw.to_string(),
            "window must be at least 1 packet".to_string(),
        ));
    }
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_server_args() {
        let args: Vec<String> = vec!["9000".into(), "8".into()];
        let parsed = parse_server_args(&args).unwrap();
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.window, 8);
    }

    #[test]
    fn rejects_wrong_arg_count() {
        let args: Vec<String> = vec!["9000".into()];
        assert!(matches!(
            parse_server_args(&args),
            Err(Error::WrongArgCount { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn rejects_zero_window() {
        let args: Vec<String> = vec!["9000".into(), "0".into()];
        assert!(matches!(parse_server_args(&args), Err(Error::InvalidWindow(_, _))));
    }

    #[test]
    fn parses_valid_client_args() {
        let args: Vec<String> = vec!["127.0.0.1".into(), "9000".into(), "8".into()];
        let parsed = parse_client_args(&args).unwrap();
        assert_eq!(parsed.peer, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(parsed.port, 9000);
    }
}
