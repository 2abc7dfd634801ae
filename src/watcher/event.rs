//! 파일 시스템 이벤트

use std::path::PathBuf;

use notify::event::{ModifyKind, RenameMode};
use notify::EventKind;

/// 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// 생성 (이름 변경의 새 경로 포함)
    Create,
    /// 내용 변경
    Write,
    /// 이름 변경의 이전 경로
    Rename,
    /// 삭제
    Remove,
}

impl FsEventKind {
    /// 경로의 프래그먼트를 다시 계산해야 하는 이벤트인지
    pub fn is_upsert(self) -> bool {
        matches!(self, Self::Create | Self::Write)
    }
}

/// 감시 루트 아래 경로에 대한 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    /// 절대 경로
    pub path: PathBuf,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// notify 이벤트를 FsEvent 목록으로 변환
///
/// 메타데이터/접근 이벤트는 버립니다.
pub fn classify(kind: &EventKind, paths: &[PathBuf]) -> Vec<FsEvent> {
    let single = |kind: FsEventKind| {
        paths
            .iter()
            .map(|p| FsEvent::new(kind, p.clone()))
            .collect::<Vec<_>>()
    };

    match kind {
        EventKind::Create(_) => single(FsEventKind::Create),
        EventKind::Remove(_) => single(FsEventKind::Remove),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => single(FsEventKind::Rename),
            RenameMode::To => single(FsEventKind::Create),
            RenameMode::Both => {
                // paths = [이전, 새]
                let mut events = Vec::with_capacity(2);
                if let Some(from) = paths.first() {
                    events.push(FsEvent::new(FsEventKind::Rename, from.clone()));
                }
                if let Some(to) = paths.get(1) {
                    events.push(FsEvent::new(FsEventKind::Create, to.clone()));
                }
                events
            }
            // 방향을 알 수 없으면 존재 여부로 판단
            RenameMode::Any | RenameMode::Other => paths
                .iter()
                .map(|p| {
                    let kind = if p.exists() {
                        FsEventKind::Create
                    } else {
                        FsEventKind::Rename
                    };
                    FsEvent::new(kind, p.clone())
                })
                .collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => vec![],
        EventKind::Modify(_) => single(FsEventKind::Write),
        EventKind::Any => paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    FsEventKind::Write
                } else {
                    FsEventKind::Remove
                };
                FsEvent::new(kind, p.clone())
            })
            .collect(),
        EventKind::Access(_) | EventKind::Other => vec![],
    }
}
