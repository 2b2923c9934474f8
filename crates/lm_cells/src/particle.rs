// crates/lm_cells/src/particle.rs

//! 粒子
//!
//! 粒子分为两部分：
//!
//! - [`ParticleBody`]: 定长、`Pod` 的本体，迁移与幽灵传输时按
//!   原始字节整体拷贝（线格式 = 内存布局，无额外封帧）
//! - 动态尾部：键合列表与排除列表，迁移时串接为独立的 `i32`
//!   流随本体之后传输
//!
//! 键合列表是 `(键型 id, 伙伴 id…)*` 的原始流；每个键型的伙伴
//! 数量（arity）由外部键合目录持有，核心只负责存储与搬运。

use bytemuck::{Pod, Zeroable};
use glam::{DVec3, IVec3};

/// 粒子标识（进程范围唯一，非负）
pub type ParticleId = i32;

/// 粒子标志位：虚拟位点
pub const FLAG_VIRTUAL: u32 = 1 << 0;
/// 粒子标志位：幽灵副本
pub const FLAG_GHOST: u32 = 1 << 1;

/// 粒子定长本体
///
/// 字段顺序保证无填充（8 字节字段在前，4 字节字段总量为 8 的
/// 倍数），因此可以安全地作为 `Pod` 按字节传输。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ParticleBody {
    /// 位置（积分期间可短暂越出盒子，迁移时折回）
    pub pos: [f64; 3],
    /// 速度
    pub vel: [f64; 3],
    /// 受力
    pub force: [f64; 3],
    /// 取向四元数
    pub quat: [f64; 4],
    /// 角速度
    pub omega: [f64; 3],
    /// 力矩
    pub torque: [f64; 3],
    /// 游动状态（推进速度、推进力）
    pub swim: [f64; 2],
    /// 电荷
    pub charge: f64,
    /// 质量
    pub mass: f64,
    /// 标识
    pub id: ParticleId,
    /// 粒子类型
    pub type_id: i32,
    /// 周期镜像计数
    pub image: [i32; 3],
    /// 标志位（FLAG_*）
    pub flags: u32,
}

impl Default for ParticleBody {
    fn default() -> Self {
        let mut body: Self = Zeroable::zeroed();
        body.quat = [1.0, 0.0, 0.0, 0.0];
        body.mass = 1.0;
        body.id = -1;
        body
    }
}

impl ParticleBody {
    /// 以 id 与位置创建
    pub fn at(id: ParticleId, pos: DVec3) -> Self {
        Self {
            pos: pos.to_array(),
            id,
            ..Default::default()
        }
    }

    /// 位置
    #[inline]
    pub fn position(&self) -> DVec3 {
        DVec3::from_array(self.pos)
    }

    /// 设置位置
    #[inline]
    pub fn set_position(&mut self, pos: DVec3) {
        self.pos = pos.to_array();
    }

    /// 镜像计数
    #[inline]
    pub fn image_count(&self) -> IVec3 {
        IVec3::from_array(self.image)
    }

    /// 设置镜像计数
    #[inline]
    pub fn set_image_count(&mut self, image: IVec3) {
        self.image = image.to_array();
    }

    /// 是否为幽灵副本
    #[inline]
    pub fn is_ghost(&self) -> bool {
        self.flags & FLAG_GHOST != 0
    }

    /// 是否为虚拟位点
    #[inline]
    pub fn is_virtual(&self) -> bool {
        self.flags & FLAG_VIRTUAL != 0
    }
}

/// 键合列表：`(键型 id, 伙伴 id…)*` 原始流
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BondList(pub Vec<i32>);

impl BondList {
    /// 追加一条键合
    pub fn push(&mut self, bond_type: i32, partners: &[ParticleId]) {
        self.0.push(bond_type);
        self.0.extend_from_slice(partners);
    }

    /// 流长度（i32 数）
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 按 arity 遍历键合条目
    ///
    /// `arity(bond_type)` 给出该键型的伙伴数量。流被截断时返回
    /// 的最后一条可能不完整，调用方（外部键合钩子）自行校验。
    pub fn entries<'a>(
        &'a self,
        arity: &'a dyn Fn(i32) -> usize,
    ) -> impl Iterator<Item = (i32, &'a [i32])> + 'a {
        let stream = &self.0;
        let mut at = 0usize;
        std::iter::from_fn(move || {
            if at >= stream.len() {
                return None;
            }
            let bond_type = stream[at];
            let n = arity(bond_type);
            let lo = at + 1;
            let hi = (lo + n).min(stream.len());
            at = hi;
            Some((bond_type, &stream[lo..hi]))
        })
    }

    /// 删除所有引用 `id` 的键合条目
    ///
    /// 伙伴粒子被销毁时由 [`crate::CellStore::remove_particle`]
    /// 调用。返回是否有条目被删除。
    pub fn remove_entries_with_partner(
        &mut self,
        id: ParticleId,
        arity: &dyn Fn(i32) -> usize,
    ) -> bool {
        let mut out = Vec::with_capacity(self.0.len());
        let mut removed = false;
        let mut at = 0usize;
        while at < self.0.len() {
            let bond_type = self.0[at];
            let n = arity(bond_type);
            let lo = at + 1;
            let hi = (lo + n).min(self.0.len());
            if self.0[lo..hi].contains(&id) {
                removed = true;
            } else {
                out.push(bond_type);
                out.extend_from_slice(&self.0[lo..hi]);
            }
            at = hi;
        }
        if removed {
            self.0 = out;
        }
        removed
    }
}

/// 粒子：定长本体 + 动态尾部
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Particle {
    /// 定长本体
    pub body: ParticleBody,
    /// 键合列表
    pub bonds: BondList,
    /// 排除列表（跳过非键合相互作用的伙伴 id）
    pub exclusions: Vec<ParticleId>,
}

impl Particle {
    /// 以 id 与位置创建
    pub fn at(id: ParticleId, pos: DVec3) -> Self {
        Self {
            body: ParticleBody::at(id, pos),
            ..Default::default()
        }
    }

    /// 标识
    #[inline]
    pub fn id(&self) -> ParticleId {
        self.body.id
    }

    /// 位置
    #[inline]
    pub fn position(&self) -> DVec3 {
        self.body.position()
    }

    /// 动态尾部长度（i32 数）
    #[inline]
    pub fn dyn_len(&self) -> usize {
        self.bonds.len() + self.exclusions.len()
    }

    /// 把动态尾部串接到迁移流
    ///
    /// 顺序固定为 键合流、排除流；接收端按
    /// [`Particle::take_dyn_from`] 以相同长度切回。
    pub fn append_dyn_to(&self, stream: &mut Vec<i32>) {
        stream.extend_from_slice(&self.bonds.0);
        stream.extend_from_slice(&self.exclusions);
    }

    /// 从迁移流恢复动态尾部
    ///
    /// `n_bonds` 与 `n_excl` 随本体传输（本体外的帧头由迁移
    /// 协议负责），`at` 为游标。
    pub fn take_dyn_from(&mut self, stream: &[i32], at: &mut usize, n_bonds: usize, n_excl: usize) {
        self.bonds.0 = stream[*at..*at + n_bonds].to_vec();
        *at += n_bonds;
        self.exclusions = stream[*at..*at + n_excl].to_vec();
        *at += n_excl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_is_pod_without_padding() {
        // 23 个 f64 + 4 字节字段共 24 字节 => 208 字节，无填充
        assert_eq!(std::mem::size_of::<ParticleBody>(), 208);
        let body = ParticleBody::at(7, DVec3::new(1.0, 2.0, 3.0));
        let bytes: &[u8] = bytemuck::bytes_of(&body);
        let back: ParticleBody = *bytemuck::from_bytes(bytes);
        assert_eq!(back, body);
    }

    #[test]
    fn test_bond_stream_roundtrip() {
        let mut p = Particle::at(1, DVec3::ZERO);
        p.bonds.push(2, &[5, 6]);
        p.bonds.push(0, &[9]);
        p.exclusions = vec![5];

        let mut stream = Vec::new();
        p.append_dyn_to(&mut stream);

        let mut q = Particle::at(1, DVec3::ZERO);
        let mut at = 0;
        q.take_dyn_from(&stream, &mut at, p.bonds.len(), p.exclusions.len());
        assert_eq!(q.bonds, p.bonds);
        assert_eq!(q.exclusions, p.exclusions);
        assert_eq!(at, stream.len());
    }

    #[test]
    fn test_bond_entry_iteration() {
        let arity = |t: i32| if t == 2 { 2 } else { 1 };
        let mut bonds = BondList::default();
        bonds.push(2, &[5, 6]);
        bonds.push(0, &[9]);
        let entries: Vec<_> = bonds.entries(&arity).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (2, &[5, 6][..]));
        assert_eq!(entries[1], (0, &[9][..]));
    }

    #[test]
    fn test_remove_bond_partner() {
        let arity = |t: i32| if t == 2 { 2 } else { 1 };
        let mut bonds = BondList::default();
        bonds.push(2, &[5, 6]);
        bonds.push(0, &[9]);
        assert!(bonds.remove_entries_with_partner(6, &arity));
        let entries: Vec<_> = bonds.entries(&arity).collect();
        assert_eq!(entries, vec![(0, &[9][..])]);
        assert!(!bonds.remove_entries_with_partner(6, &arity));
    }
}
