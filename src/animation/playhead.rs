//! 播放头

/// 播放进度与循环状态
#[derive(Debug, Clone, PartialEq)]
pub struct Playhead {
    current: f32,
    previous: f32,
    /// 最后一个关键帧
    end: f32,
    /// 本次越过末尾已报告
    reached_end: bool,
    loop_count: u32,
    /// 上次回绕时所在的帧
    loop_origin: f32,
    /// 平滑切入窗口（帧）
    blend_window: f32,
    /// 切入开始后经过的帧；None 表示不混合
    blend_elapsed: Option<f32>,
}

impl Playhead {
    pub fn new(end: f32, blend_window: Option<f32>) -> Self {
        Self {
            current: 0.0,
            previous: 0.0,
            end: end.max(0.0),
            reached_end: false,
            loop_count: 0,
            loop_origin: 0.0,
            blend_window: blend_window.unwrap_or(0.0),
            blend_elapsed: blend_window.map(|_| 0.0),
        }
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn previous(&self) -> f32 {
        self.previous
    }

    #[inline]
    pub fn end(&self) -> f32 {
        self.end
    }

    #[inline]
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    #[inline]
    pub fn loop_origin(&self) -> f32 {
        self.loop_origin
    }

    /// 前进 `delta` 帧；本次越过最后一个关键帧时返回 true
    pub fn advance(&mut self, delta: f32) -> bool {
        let delta = delta.max(0.0);
        self.previous = self.current;
        self.current += delta;
        if let Some(elapsed) = self.blend_elapsed.as_mut() {
            *elapsed += delta;
        }
        if !self.reached_end && self.current >= self.end && delta > 0.0 {
            self.reached_end = true;
            return true;
        }
        false
    }

    /// 从 `frame_at` 回绕到 `target`（循环用）
    ///
    /// 越过末尾的帧数保留到回绕后的位置，按循环区间 `[target, end)` 取余。
    /// 前后帧设为同一位置，下一次采样不会与回绕前的位置混合。
    pub fn rewind(&mut self, target: f32, frame_at: f32) {
        let target = target.clamp(0.0, self.end);
        let period = self.end - target;
        let overshoot = (frame_at - self.end).max(0.0);
        let landed = if period > 0.0 {
            target + overshoot % period
        } else {
            target
        };
        self.current = landed;
        self.previous = landed;
        self.reached_end = false;
        self.loop_origin = frame_at;
        self.loop_count += 1;
        self.blend_elapsed = None;
    }

    /// 替换动作时更新末尾，保持当前帧
    ///
    /// 当前帧已超过新末尾时，下一次前进会报告越过。
    pub fn set_end(&mut self, end: f32) {
        self.end = end.max(0.0);
        self.reached_end = false;
    }

    /// 重新开始平滑切入
    pub fn restart_blend(&mut self, blend_window: f32) {
        self.blend_window = blend_window;
        self.blend_elapsed = Some(0.0);
    }

    #[inline]
    pub fn blend_elapsed(&self) -> Option<f32> {
        self.blend_elapsed
    }

    /// 切入比例：在窗口内从 0 线性增加到 1
    pub fn blend_rate(&self) -> f32 {
        ramp(self.blend_elapsed, self.blend_window)
    }

    /// 以另一个窗口长度计算切入比例（Morph 用）
    pub fn blend_rate_over(&self, window: f32) -> f32 {
        ramp(self.blend_elapsed, window)
    }
}

#[inline]
fn ramp(elapsed: Option<f32>, window: f32) -> f32 {
    match elapsed {
        Some(elapsed) if window > 0.0 => (elapsed / window).clamp(0.0, 1.0),
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_reports_crossing_once() {
        let mut head = Playhead::new(10.0, None);
        assert!(!head.advance(4.0));
        assert!(!head.advance(4.0));
        assert!(head.advance(4.0));
        assert_eq!(head.current(), 12.0);
        assert!(!head.advance(1.0));
    }

    #[test]
    fn single_key_motion_ends_on_first_advance() {
        let mut head = Playhead::new(0.0, None);
        assert!(head.advance(1.0));
    }

    #[test]
    fn rewind_rebases_loop_bookkeeping() {
        let mut head = Playhead::new(10.0, Some(20.0));
        head.advance(11.0);
        head.rewind(0.0, 11.0);
        assert_eq!(head.current(), 1.0);
        assert_eq!(head.previous(), 1.0);
        assert_eq!(head.loop_count(), 1);
        assert_eq!(head.loop_origin(), 11.0);
        // 回绕后不再混合
        assert_eq!(head.blend_rate(), 1.0);
        // 可以再次越过末尾
        assert!(head.advance(9.0));
    }

    #[test]
    fn rewind_carries_overshoot_into_loop_range() {
        let mut head = Playhead::new(10.0, None);
        head.advance(13.0);
        head.rewind(4.0, 13.0);
        assert_eq!(head.current(), 7.0);

        // 越过量超过一个循环区间时取余
        let mut head = Playhead::new(10.0, None);
        head.advance(25.0);
        head.rewind(4.0, 25.0);
        assert_eq!(head.current(), 7.0);

        // 循环区间为空时停在目标帧
        let mut head = Playhead::new(10.0, None);
        head.advance(12.0);
        head.rewind(10.0, 12.0);
        assert_eq!(head.current(), 10.0);
    }

    #[test]
    fn loop_position_does_not_depend_on_tick_size() {
        let run = |step: f32| {
            let mut head = Playhead::new(10.0, None);
            for _ in 0..(30.0 / step) as usize {
                if head.advance(step) {
                    let at = head.current();
                    head.rewind(2.0, at);
                }
            }
            (head.current(), head.loop_count())
        };
        // 30 帧：0→10 一次，之后每 8 帧一次，停在 2 + (20 % 8)
        assert_eq!(run(1.0), (6.0, 3));
        assert_eq!(run(3.0), (6.0, 3));
        assert_eq!(run(5.0), (6.0, 3));
    }

    #[test]
    fn blend_rate_ramps_linearly() {
        let mut head = Playhead::new(100.0, Some(20.0));
        assert_eq!(head.blend_rate(), 0.0);
        head.advance(5.0);
        assert!((head.blend_rate() - 0.25).abs() < 1e-6);
        assert!((head.blend_rate_over(6.0) - 5.0 / 6.0).abs() < 1e-6);
        head.advance(30.0);
        assert_eq!(head.blend_rate(), 1.0);
        assert_eq!(Playhead::new(100.0, None).blend_rate(), 1.0);
    }

    #[test]
    fn set_end_keeps_current_frame() {
        let mut head = Playhead::new(10.0, None);
        head.advance(6.0);
        head.set_end(30.0);
        assert_eq!(head.current(), 6.0);
        assert!(!head.advance(1.0));
        head.set_end(5.0);
        assert!(head.advance(1.0));
    }
}
