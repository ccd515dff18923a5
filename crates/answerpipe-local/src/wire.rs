//! Line framing for streamed HTTP bodies (NDJSON event lines and SSE `data:` lines).

use answerpipe_core::{Error, Result};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::VecDeque;

struct LineState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buf: Vec<u8>,
    ready: VecDeque<String>,
    eof: bool,
}

impl LineState {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.ready.push_back(decode_line(&line));
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Splits a response body into lines, in order. A transport error is yielded once, after every
/// complete line received before it; the stream then ends.
pub fn line_stream(resp: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let body = resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed();
    lines_from_chunks(body)
}

pub(crate) fn lines_from_chunks(
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
) -> BoxStream<'static, Result<String>> {
    let st = LineState {
        body,
        buf: Vec::new(),
        ready: VecDeque::new(),
        eof: false,
    };
    futures_util::stream::unfold(st, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.eof {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    st.buf.extend_from_slice(&chunk);
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.eof = true;
                    return Some((Err(Error::Stream(e.to_string())), st));
                }
                None => {
                    st.eof = true;
                    if !st.buf.is_empty() {
                        let tail = std::mem::take(&mut st.buf);
                        st.ready.push_back(decode_line(&tail));
                    }
                }
            }
        }
    })
    .boxed()
}

/// Payload of an SSE `data:` line; `None` for comments, event names and blank keep-alives.
pub fn sse_data(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
