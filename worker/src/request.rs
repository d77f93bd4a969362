use std::io;

use comms::{Multipart, Tagged, msg};
use serde::Serialize;

/// The accumulated results of a request that still has bunches in flight.
#[derive(Debug)]
pub struct ClientRequest<O, T> {
    outputs: Vec<O>,
    traces: Option<Vec<T>>,
}

impl<O, T> Default for ClientRequest<O, T> {
    fn default() -> Self {
        Self {
            outputs: Vec::new(),
            traces: None,
        }
    }
}

impl<O, T> ClientRequest<O, T> {
    /// Appends an output, and its trace if the engine produced one.
    pub fn push(&mut self, output: O, trace: Option<T>) {
        self.outputs.push(output);

        if let Some(trace) = trace {
            self.traces.get_or_insert_with(Vec::new).push(trace);
        }
    }

    /// Closes the accumulator for `request`.
    pub fn complete(self, request: u32) -> Completed<O, T> {
        Completed {
            request,
            outputs: self.outputs,
            traces: self.traces,
        }
    }
}

/// A request with no bunch left in flight, ready to be sent back.
#[derive(Debug)]
pub struct Completed<O, T> {
    pub request: u32,
    pub outputs: Vec<O>,
    pub traces: Option<Vec<T>>,
}

impl<O: Tagged, T: Serialize> Completed<O, T> {
    /// Encodes the result as `[outputs, traces?, request id]`.
    pub fn into_multipart(self) -> io::Result<Multipart> {
        let mut frames = Vec::with_capacity(3);
        frames.push(msg::encode_items(&self.outputs)?);

        if let Some(traces) = &self.traces {
            frames.push(msg::encode_items(traces)?);
        }

        frames.push(msg::encode_id(self.request));
        Ok(frames)
    }
}
