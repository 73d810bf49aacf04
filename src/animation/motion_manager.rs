//! 多动作播放管理
//!
//! 每个模型实例持有一个 `MotionManager`。播放器按优先级升序写入
//! （同优先级按添加顺序），因此高优先级的值直接覆盖低优先级。
//! 删除与替换在两次 `update` 之间生效。

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use glam::Vec3;

use super::controller::{ApplyMode, MotionController};
use super::motion::Motion;
use super::playhead::Playhead;
use crate::arena::{Arena, Handle};
use crate::config::EngineConfig;
use crate::logging::LogSink;
use crate::morph::MorphManager;
use crate::skeleton::BoneSet;
use crate::ReferenceError;

bitflags! {
    /// 播放器标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PlayerFlags: u8 {
        /// 写入所有通道；未设置时跳过静态通道（部分动作）
        const FULL       = 1 << 0;
        /// 到达末尾后回到 `loop_at`；未设置时播放一次
        const LOOP       = 1 << 1;
        /// 从当前姿态平滑切入
        const SMOOTH     = 1 << 2;
        /// 循环 / 结束时把中心骨骼的位移并入模型根偏移
        const REPOSITION = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Running,
    Looped,
    Deleted,
}

/// 添加动作的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionOptions {
    pub flags: PlayerFlags,
    pub priority: i32,
    /// 循环时回到的帧；`None` 时使用 `EngineConfig::default_loop_frame`
    pub loop_at: Option<f32>,
    /// 播放速度倍率
    pub speed: f32,
}

impl Default for MotionOptions {
    fn default() -> Self {
        Self {
            flags: PlayerFlags::FULL | PlayerFlags::LOOP | PlayerFlags::SMOOTH,
            priority: 0,
            loop_at: None,
            speed: 1.0,
        }
    }
}

impl MotionOptions {
    pub fn with_flags(mut self, flags: PlayerFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_loop_at(mut self, loop_at: f32) -> Self {
        self.loop_at = Some(loop_at);
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }
}

/// 动作事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionEvent {
    Added(String),
    Changed(String),
    Deleted(String),
    Finished(String),
}

/// 动作事件回调（默认空实现）
pub trait MotionEventListener {
    fn on_motion_added(&mut self, _alias: &str) {}
    fn on_motion_changed(&mut self, _alias: &str) {}
    fn on_motion_deleted(&mut self, _alias: &str) {}
    fn on_motion_finished(&mut self, _alias: &str) {}
}

/// 播放器
#[derive(Debug, Clone)]
pub struct MotionPlayer {
    alias: String,
    controller: MotionController,
    playhead: Playhead,
    priority: i32,
    flags: PlayerFlags,
    status: PlayerStatus,
    loop_at: f32,
    speed: f32,
    /// 添加顺序（同优先级排序用）
    sequence: u64,
}

impl MotionPlayer {
    #[inline]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[inline]
    pub fn motion(&self) -> &Arc<Motion> {
        self.controller.motion()
    }

    #[inline]
    pub fn current_frame(&self) -> f32 {
        self.playhead.current()
    }

    #[inline]
    pub fn playhead(&self) -> &Playhead {
        &self.playhead
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[inline]
    pub fn flags(&self) -> PlayerFlags {
        self.flags
    }

    #[inline]
    pub fn status(&self) -> PlayerStatus {
        self.status
    }

    #[inline]
    pub fn speed(&self) -> f32 {
        self.speed
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.status != PlayerStatus::Deleted
    }
}

pub type PlayerHandle = Handle<MotionPlayer>;

/// 单次 `update` 的结果
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateReport {
    /// 需要并入模型根偏移的位移
    pub reposition: Vec3,
    pub applied: usize,
    pub pruned: usize,
}

/// 多动作管理器
#[derive(Debug)]
pub struct MotionManager {
    players: Arena<MotionPlayer>,
    aliases: HashMap<String, PlayerHandle>,
    events: Vec<MotionEvent>,
    next_sequence: u64,
    bone_blend_in_frames: f32,
    morph_blend_in_frames: f32,
    default_loop_frame: f32,
}

impl Default for MotionManager {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl MotionManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            players: Arena::new(),
            aliases: HashMap::new(),
            events: Vec::new(),
            next_sequence: 0,
            bone_blend_in_frames: config.bone_blend_in_frames,
            morph_blend_in_frames: config.morph_blend_in_frames,
            default_loop_frame: config.default_loop_frame,
        }
    }

    // ========================================
    // 播放器操作
    // ========================================

    /// 添加动作；别名已被使用时失败且不修改任何状态
    pub fn add_motion(
        &mut self,
        alias: &str,
        motion: Arc<Motion>,
        options: MotionOptions,
        skeleton: &BoneSet,
        morphs: &MorphManager,
        sink: &dyn LogSink,
    ) -> Result<PlayerHandle, ReferenceError> {
        if self.aliases.contains_key(alias) {
            sink.warn(&format!("motion alias '{}' already used", alias));
            return Err(ReferenceError::AliasAlreadyUsed(alias.to_string()));
        }

        let smooth = options.flags.contains(PlayerFlags::SMOOTH);
        let controller = MotionController::bind(motion, skeleton, morphs, smooth, sink);
        let playhead = Playhead::new(
            controller.end_frame(),
            smooth.then_some(self.bone_blend_in_frames),
        );

        let player = MotionPlayer {
            alias: alias.to_string(),
            controller,
            playhead,
            priority: options.priority,
            flags: options.flags,
            status: PlayerStatus::Running,
            loop_at: options.loop_at.unwrap_or(self.default_loop_frame),
            speed: options.speed.max(0.0),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        let handle = self.players.insert(player);
        self.aliases.insert(alias.to_string(), handle);
        self.events.push(MotionEvent::Added(alias.to_string()));
        sink.debug(&format!("motion '{}' added", alias));
        Ok(handle)
    }

    /// 替换别名对应的动作，保持当前帧
    pub fn change_motion(
        &mut self,
        alias: &str,
        motion: Arc<Motion>,
        skeleton: &BoneSet,
        morphs: &MorphManager,
        sink: &dyn LogSink,
    ) -> Result<(), ReferenceError> {
        let handle = self.live_handle(alias, sink)?;
        let bone_window = self.bone_blend_in_frames;
        let player = self
            .players
            .get_mut(handle)
            .ok_or_else(|| ReferenceError::AliasNotFound(alias.to_string()))?;

        let smooth = player.flags.contains(PlayerFlags::SMOOTH);
        // 旧的控制器（及其对动作的引用）在此处释放
        player.controller = MotionController::bind(motion, skeleton, morphs, smooth, sink);
        player.playhead.set_end(player.controller.end_frame());
        if smooth {
            player.playhead.restart_blend(bone_window);
        }
        player.status = PlayerStatus::Running;

        self.events.push(MotionEvent::Changed(alias.to_string()));
        sink.debug(&format!("motion '{}' changed at frame {}", alias, player.playhead.current()));
        Ok(())
    }

    /// 标记删除；别名立即释放，播放器在下一次 `update` 时移除
    pub fn delete_motion(&mut self, alias: &str, sink: &dyn LogSink) -> Result<(), ReferenceError> {
        let handle = self.live_handle(alias, sink)?;
        self.aliases.remove(alias);
        if let Some(player) = self.players.get_mut(handle) {
            player.status = PlayerStatus::Deleted;
        }
        Ok(())
    }

    pub fn set_priority(&mut self, alias: &str, priority: i32, sink: &dyn LogSink) -> Result<(), ReferenceError> {
        self.live_player_mut(alias, sink)?.priority = priority;
        Ok(())
    }

    pub fn set_speed(&mut self, alias: &str, speed: f32, sink: &dyn LogSink) -> Result<(), ReferenceError> {
        self.live_player_mut(alias, sink)?.speed = speed.max(0.0);
        Ok(())
    }

    pub fn current_frame(&self, alias: &str) -> Option<f32> {
        self.player_by_alias(alias).map(MotionPlayer::current_frame)
    }

    pub fn handle(&self, alias: &str) -> Option<PlayerHandle> {
        self.aliases.get(alias).copied()
    }

    pub fn player(&self, handle: PlayerHandle) -> Option<&MotionPlayer> {
        self.players.get(handle)
    }

    pub fn player_by_alias(&self, alias: &str) -> Option<&MotionPlayer> {
        self.handle(alias).and_then(|h| self.players.get(h))
    }

    /// 所有播放器（含待移除的），按写入顺序
    pub fn players(&self) -> Vec<&MotionPlayer> {
        self.ordered_handles()
            .into_iter()
            .filter_map(|h| self.players.get(h))
            .collect()
    }

    /// 存活的别名数
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    fn live_handle(&self, alias: &str, sink: &dyn LogSink) -> Result<PlayerHandle, ReferenceError> {
        match self.aliases.get(alias) {
            Some(&handle) if self.players.contains(handle) => Ok(handle),
            _ => {
                sink.warn(&format!("motion alias '{}' not found", alias));
                Err(ReferenceError::AliasNotFound(alias.to_string()))
            }
        }
    }

    fn live_player_mut(&mut self, alias: &str, sink: &dyn LogSink) -> Result<&mut MotionPlayer, ReferenceError> {
        let handle = self.live_handle(alias, sink)?;
        self.players
            .get_mut(handle)
            .ok_or_else(|| ReferenceError::AliasNotFound(alias.to_string()))
    }

    fn ordered_handles(&self) -> Vec<PlayerHandle> {
        let mut handles: Vec<(i32, u64, PlayerHandle)> = self
            .players
            .iter()
            .map(|(h, p)| (p.priority, p.sequence, h))
            .collect();
        handles.sort_unstable_by_key(|&(priority, sequence, _)| (priority, sequence));
        handles.into_iter().map(|(_, _, h)| h).collect()
    }

    // ========================================
    // 每帧更新
    // ========================================

    /// 移除已删除的播放器，写入所有存活播放器的当前帧，然后前进 `delta` 帧
    pub fn update(
        &mut self,
        delta: f32,
        skeleton: &mut BoneSet,
        morphs: &mut MorphManager,
        sink: &dyn LogSink,
    ) -> UpdateReport {
        let mut report = UpdateReport {
            pruned: self.prune(),
            ..UpdateReport::default()
        };

        let center = skeleton.center_bone();
        for handle in self.ordered_handles() {
            let Some(player) = self.players.get_mut(handle) else {
                continue;
            };

            let mode = ApplyMode {
                full: player.flags.contains(PlayerFlags::FULL),
                bone_rate: player.playhead.blend_rate(),
                morph_rate: player.playhead.blend_rate_over(self.morph_blend_in_frames),
            };
            player
                .controller
                .apply(player.playhead.current(), mode, skeleton, morphs);
            report.applied += 1;

            if !player.playhead.advance(delta * player.speed) {
                continue;
            }

            let end = player.playhead.end();
            let reposition = player.flags.contains(PlayerFlags::REPOSITION);
            if player.flags.contains(PlayerFlags::LOOP) {
                if reposition {
                    report.reposition += center_shift(&player.controller, center, player.loop_at, end);
                }
                let frame_at = player.playhead.current();
                player.playhead.rewind(player.loop_at, frame_at);
                player.status = PlayerStatus::Looped;
                sink.debug(&format!(
                    "motion '{}' looped ({})",
                    player.alias,
                    player.playhead.loop_count()
                ));
            } else {
                if reposition {
                    report.reposition += center_shift(&player.controller, center, 0.0, end);
                }
                player.status = PlayerStatus::Deleted;
                let alias = player.alias.clone();
                if self.aliases.get(&alias) == Some(&handle) {
                    self.aliases.remove(&alias);
                }
                self.events.push(MotionEvent::Finished(alias));
            }
        }

        report
    }

    /// 移除已删除的播放器
    fn prune(&mut self) -> usize {
        let dead: Vec<PlayerHandle> = self
            .players
            .iter()
            .filter(|(_, p)| !p.is_live())
            .map(|(h, _)| h)
            .collect();
        for &handle in &dead {
            if let Some(player) = self.players.remove(handle) {
                self.events.push(MotionEvent::Deleted(player.alias));
            }
        }
        dead.len()
    }

    /// 删除所有播放器（卸载模型时）
    pub fn clear(&mut self) {
        let handles: Vec<PlayerHandle> = self.players.iter().map(|(h, _)| h).collect();
        for handle in handles {
            if let Some(player) = self.players.remove(handle) {
                self.events.push(MotionEvent::Deleted(player.alias));
            }
        }
        self.aliases.clear();
    }

    // ========================================
    // 事件
    // ========================================

    pub fn drain_events(&mut self) -> Vec<MotionEvent> {
        std::mem::take(&mut self.events)
    }

    /// 把积压的事件分发给监听器
    pub fn dispatch_events(&mut self, listener: &mut dyn MotionEventListener) {
        for event in self.drain_events() {
            match &event {
                MotionEvent::Added(alias) => listener.on_motion_added(alias),
                MotionEvent::Changed(alias) => listener.on_motion_changed(alias),
                MotionEvent::Deleted(alias) => listener.on_motion_deleted(alias),
                MotionEvent::Finished(alias) => listener.on_motion_finished(alias),
            }
        }
    }
}

/// 中心骨骼在 `from` → `to` 之间的水平位移
fn center_shift(controller: &MotionController, center: Option<usize>, from: f32, to: f32) -> Vec3 {
    let Some(center) = center else {
        return Vec3::ZERO;
    };
    let start = controller
        .sample_bone(center, from)
        .map(|s| s.translation)
        .unwrap_or(Vec3::ZERO);
    let end = controller
        .sample_bone(center, to)
        .map(|s| s.translation)
        .unwrap_or(Vec3::ZERO);
    let shift = end - start;
    Vec3::new(shift.x, 0.0, shift.z)
}
