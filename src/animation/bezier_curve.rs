//! 贝塞尔曲线
//!
//! VMD 关键帧的缓动曲线：控制点在时间轴上求解，结果作用在数值轴上。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use glam::Vec2;

/// 曲线 trait
pub trait Curve {
    fn value(&self, v: f32) -> f32;
}

/// 三次贝塞尔曲线（端点固定为 (0,0) 和 (1,1)）
#[derive(Debug, Clone, PartialEq)]
pub struct BezierCurve {
    /// 预计算的曲线采样点（按 X 排序）
    points: Vec<Vec2>,
    c0: Vec2,
    c1: Vec2,
    interval: u32,
}

impl BezierCurve {
    const P0: Vec2 = Vec2::ZERO;
    const P1: Vec2 = Vec2::ONE;

    /// `c0` / `c1` 为归一化到 [0, 1] 的控制点
    pub fn new(c0: Vec2, c1: Vec2, interval: u32) -> Self {
        let interval = interval.max(1);
        let mut points = Vec::with_capacity((interval + 1) as usize);
        let interval_f = interval as f32;

        for i in 0..=interval {
            let t = i as f32 / interval_f;
            let it = 1.0 - t;
            // B(t) = (1-t)³P₀ + 3(1-t)²tC₀ + 3(1-t)t²C₁ + t³P₁
            let point = Self::P0 * it.powi(3)
                + c0 * 3.0 * it.powi(2) * t
                + c1 * 3.0 * it * t.powi(2)
                + Self::P1 * t.powi(3);
            points.push(point);
        }

        points.sort_unstable_by(|a, b| a.x.total_cmp(&b.x));

        Self {
            points,
            c0,
            c1,
            interval,
        }
    }

    /// VMD 参数 `[x1, y1, x2, y2]`，范围 [0, 127]
    pub fn from_parameters(parameters: [u8; 4], interval: u32) -> Self {
        let c0 = Vec2::new(parameters[0] as f32 / 127.0, parameters[1] as f32 / 127.0);
        let c1 = Vec2::new(parameters[2] as f32 / 127.0, parameters[3] as f32 / 127.0);
        Self::new(c0, c1, interval)
    }

    #[inline]
    pub fn control_points(&self) -> (Vec2, Vec2) {
        (self.c0, self.c1)
    }

    #[inline]
    pub fn interval(&self) -> u32 {
        self.interval
    }
}

impl Curve for BezierCurve {
    /// 在采样点之间线性查找
    fn value(&self, v: f32) -> f32 {
        let v = v.clamp(0.0, 1.0);
        let mut n = (self.points[0], self.points[1]);
        for point in &self.points[2..] {
            if n.1.x > v {
                break;
            }
            n = (n.1, *point);
        }
        if n.0.x == n.1.x {
            n.0.y
        } else {
            n.0.y + (v - n.0.x) * (n.1.y - n.0.y) / (n.1.x - n.0.x)
        }
    }
}

/// `x1 == y1 && x2 == y2` 时曲线是对角线，直接线性插值
#[inline]
pub fn is_linear_parameters(parameters: [u8; 4]) -> bool {
    parameters[0] == parameters[1] && parameters[2] == parameters[3]
}

/// 贝塞尔曲线工厂 trait
pub trait BezierCurveFactory {
    fn get_or_new(&self, parameters: [u8; 4], interval: u32) -> Arc<BezierCurve>;

    /// 线性参数返回 None
    fn curve_for(&self, parameters: [u8; 4], interval: u32) -> Option<Arc<BezierCurve>> {
        if is_linear_parameters(parameters) {
            None
        } else {
            Some(self.get_or_new(parameters, interval))
        }
    }
}

/// 贝塞尔曲线缓存
///
/// 相同参数的曲线只创建一次，由所有关键帧共享。
#[derive(Debug, Default)]
pub struct BezierCurveCache(RwLock<HashMap<[u8; 4], Arc<BezierCurve>>>);

impl BezierCurveCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BezierCurveFactory for BezierCurveCache {
    fn get_or_new(&self, parameters: [u8; 4], interval: u32) -> Arc<BezierCurve> {
        let build_new_curve = || Arc::new(BezierCurve::from_parameters(parameters, interval));

        match self.0.read() {
            Ok(map) => {
                if let Some(curve) = map.get(&parameters) {
                    // 缓存的精度不够时重新创建
                    if curve.interval >= interval {
                        return curve.clone();
                    }
                }
            }
            Err(_) => return build_new_curve(),
        };

        match self.0.write() {
            Ok(mut map) => {
                let entry = map.entry(parameters).or_insert_with(build_new_curve);
                if entry.interval < interval {
                    *entry = build_new_curve();
                }
                entry.clone()
            }
            Err(_) => build_new_curve(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_curve() {
        let curve = BezierCurve::new(Vec2::new(0.25, 0.25), Vec2::new(0.75, 0.75), 100);
        assert!((curve.value(0.0) - 0.0).abs() < 0.01);
        assert!((curve.value(0.5) - 0.5).abs() < 0.05);
        assert!((curve.value(1.0) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_ease_in_curve() {
        let curve = BezierCurve::new(Vec2::new(0.42, 0.0), Vec2::new(1.0, 1.0), 100);
        assert!(curve.value(0.25) < 0.25);
    }

    #[test]
    fn linear_parameters_skip_curve() {
        let cache = BezierCurveCache::new();
        assert!(cache.curve_for([20, 20, 107, 107], 64).is_none());
        assert!(cache.curve_for([64, 0, 64, 127], 64).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache() {
        let cache = BezierCurveCache::new();
        let curve1 = cache.get_or_new([32, 0, 96, 127], 64);
        let curve2 = cache.get_or_new([32, 0, 96, 127], 64);
        assert!(Arc::ptr_eq(&curve1, &curve2));

        // 更高精度的请求替换缓存
        let curve3 = cache.get_or_new([32, 0, 96, 127], 128);
        assert_eq!(curve3.interval(), 128);
        assert!(Arc::ptr_eq(&curve3, &cache.get_or_new([32, 0, 96, 127], 64)));
    }
}
