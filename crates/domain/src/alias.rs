use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 好友备注：`owner_id` 给 `target_user_id` 起的私有显示名。
///
/// 方向性的、非对称的记录，只有 owner 自己能看到。访客没有稳定身份，
/// 因此永远不会被备注。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendAlias {
    pub owner_id: UserId,
    pub target_user_id: UserId,
    pub alias: String,
}

impl FriendAlias {
    /// 空白备注等同于没有备注。
    pub fn effective_alias(&self) -> Option<&str> {
        let alias = self.alias.trim();
        (!alias.is_empty()).then_some(alias)
    }
}
