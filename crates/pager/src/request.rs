use std::sync::Arc;

use async_channel::Sender;
use defines::error::{Error, KResult};
use memory::Frame;

use crate::backing::{BackingObject, Extent, MemoryControl, PageIn};

/// 发往某个对象的一个请求
pub(crate) struct Request {
    object: Arc<BackingObject>,
    kind: RequestKind,
}

pub(crate) enum RequestKind {
    Init {
        control: Arc<dyn MemoryControl>,
        reply: Sender<KResult<()>>,
    },
    ReadPage {
        offset: u64,
        reply: Sender<KResult<PageIn>>,
    },
    WritePage {
        offset: u64,
        frame: Frame,
        reply: Sender<KResult<()>>,
    },
    UnlockPage {
        offset: u64,
        reply: Sender<KResult<()>>,
    },
    ReportExtent {
        reply: Sender<KResult<Extent>>,
    },
    Terminate {
        reply: Sender<KResult<()>>,
    },
    /// 最后一个发送权被释放了
    NoSenders,
}

impl RequestKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::ReadPage { .. } => "read_page",
            Self::WritePage { .. } => "write_page",
            Self::UnlockPage { .. } => "unlock_page",
            Self::ReportExtent { .. } => "report_extent",
            Self::Terminate { .. } => "terminate",
            Self::NoSenders => "no_senders",
        }
    }
}

/// 回复通道容量为 1 且只用一次，不会满；请求者已经走了的话结果直接丢掉
fn reply_with<T>(reply: Sender<KResult<T>>, result: KResult<T>) {
    let _ = reply.try_send(result);
}

impl Request {
    pub(crate) fn new(object: Arc<BackingObject>, kind: RequestKind) -> Self {
        Self { object, kind }
    }

    pub(crate) fn dispatch(self) {
        let Self { object, kind } = self;
        log::trace!(
            "{}: {} on object {}",
            object.group().name(),
            kind.name(),
            object.id()
        );
        match kind {
            RequestKind::NoSenders => object.release_endpoint(),
            RequestKind::Init { control, reply } => {
                let result = object.backend().and_then(|_| object.attach(control));
                reply_with(reply, result);
            }
            RequestKind::ReadPage { offset, reply } => {
                let result = object
                    .backend()
                    .and_then(|backend| backend.read_page(offset).map_err(Error::from));
                reply_with(reply, result);
            }
            RequestKind::WritePage {
                offset,
                frame,
                reply,
            } => {
                // 对象已经失效时 frame 随闭包一起被丢掉
                let result = object
                    .backend()
                    .and_then(|backend| backend.write_page(offset, frame));
                reply_with(reply, result);
            }
            RequestKind::UnlockPage { offset, reply } => {
                let result = object
                    .backend()
                    .and_then(|backend| backend.unlock_page(offset));
                reply_with(reply, result);
            }
            RequestKind::ReportExtent { reply } => {
                let result = object.backend().map(|backend| backend.report_extent());
                reply_with(reply, result);
            }
            RequestKind::Terminate { reply } => {
                let result = object.backend().map(|_| object.detach());
                reply_with(reply, result);
            }
        }
    }
}
