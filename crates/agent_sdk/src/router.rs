use std::sync::Arc;

use tracing::trace;

use crate::codec::classify;
use crate::control::ControlPlane;
use crate::process::ProcessChannel;
use crate::stream::FramedStream;
use crate::types::{AgentMessage, Frame};

/// Demultiplexes the process channel's raw line stream into the control
/// plane (requests, responses, cancels) and the orchestrator's output
/// sequence (everything else). Runs as a single background task for the
/// lifetime of the orchestrator; never blocks on an inbound permission
/// callback, since that would stall delivery of unrelated conversation
/// messages arriving concurrently.
pub async fn run(
    channel: Arc<ProcessChannel>,
    control: Arc<ControlPlane>,
    output: Arc<FramedStream<AgentMessage>>,
) {
    let raw = channel.messages();
    loop {
        let next = raw.next().await;
        match next {
            Some(Ok(value)) => match classify(value) {
                Frame::ControlCancel(frame) => {
                    trace!("routing control cancel for {}", frame.request_id);
                    control.handle_cancel(&frame).await;
                }
                Frame::ControlResponse(frame) => {
                    trace!("routing control response for {}", frame.request_id);
                    control.handle_response(frame).await;
                }
                Frame::ControlRequest(frame) => {
                    let channel = channel.clone();
                    let control = control.clone();
                    tokio::spawn(async move {
                        control.dispatch_inbound(&channel, frame).await;
                    });
                }
                Frame::Message(message) => {
                    if output.enqueue(message).is_err() {
                        break;
                    }
                }
            },
            Some(Err(_)) => {
                // The raw channel carries no errors of its own today
                // (decode failures are dropped upstream); treat this as
                // end of stream defensively.
                break;
            }
            None => break,
        }
    }
    output.mark_done();
}
